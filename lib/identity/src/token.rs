//! Identity token parsing and validation.
//!
//! A token is parsed once into an [`IdToken`] whose claims can be read before
//! any check runs. Only [`TokenValidator::verify`] produces [`TrustedClaims`]
//! with verified provenance; the sole other source is the explicit
//! verification-disabled path in the sign-in flow.

use crate::error::{ClaimCheck, TokenError};
use crate::jwks::KeyCache;
use crate::policy::Policy;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use rootcause::prelude::Report;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Claim names that may carry the policy identifier, in lookup order.
const POLICY_CLAIMS: [&str; 2] = ["acr", "tfp"];

/// The value of one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Absent,
    One(String),
    Many(Vec<String>),
}

impl Claim {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::String(s) => Self::One(s.clone()),
            Value::Array(items) => Self::Many(items.iter().map(value_to_string).collect()),
            other => Self::One(other.to_string()),
        }
    }

    /// The single value, or the first element of a list.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::One(value) => Some(value),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }

    /// Like [`Claim::first`], with absent values as an empty string.
    #[must_use]
    pub fn first_or_empty(&self) -> String {
        self.first().unwrap_or_default().to_string()
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Claims carried by a token, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Looks up a claim. Lookups never fail; unknown names are [`Claim::Absent`].
    #[must_use]
    pub fn get_claim(&self, name: &str) -> Claim {
        self.0.get(name).map_or(Claim::Absent, Claim::from_value)
    }

    /// The identifier of the policy that issued the token.
    #[must_use]
    pub fn policy_identifier(&self) -> Option<String> {
        POLICY_CLAIMS
            .iter()
            .find_map(|name| self.get_claim(name).first().map(str::to_string))
    }

    fn numeric(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }
}

/// A parsed, not yet validated identity token.
#[derive(Debug, Clone)]
pub struct IdToken {
    raw: String,
    header: Header,
    claims: ClaimSet,
}

impl IdToken {
    /// Splits and decodes a compact JWS. No signature or claim checks run.
    pub fn parse(raw: &str) -> Result<Self, Report<TokenError>> {
        let malformed = |reason: String| TokenError::Malformed { reason };

        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(malformed("expected three non-empty dot-separated segments".to_string()).into());
        }

        let header = jsonwebtoken::decode_header(raw.trim())
            .map_err(|e| malformed(format!("invalid header: {e}")))?;

        let payload = URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .map_err(|e| malformed(format!("payload is not base64url: {e}")))?;
        let claims: Map<String, Value> = serde_json::from_slice(&payload)
            .map_err(|e| malformed(format!("payload is not a JSON object: {e}")))?;

        Ok(Self {
            raw: raw.trim().to_string(),
            header,
            claims: ClaimSet(claims),
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Claims as posted. Nothing here has been checked.
    #[must_use]
    pub fn unverified_claims(&self) -> &ClaimSet {
        &self.claims
    }

    #[must_use]
    pub fn get_claim(&self, name: &str) -> Claim {
        self.claims.get_claim(name)
    }
}

/// How a [`TrustedClaims`] value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Signature and claims were checked.
    Verified,
    /// Verification is switched off in configuration.
    VerificationDisabled,
}

/// Claims the sign-in flow is allowed to act on.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustedClaims {
    claims: ClaimSet,
    provenance: Provenance,
}

impl TrustedClaims {
    pub(crate) fn verified(claims: ClaimSet) -> Self {
        Self {
            claims,
            provenance: Provenance::Verified,
        }
    }

    pub(crate) fn unverified(token: &IdToken) -> Self {
        Self {
            claims: token.claims.clone(),
            provenance: Provenance::VerificationDisabled,
        }
    }

    #[must_use]
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    #[must_use]
    pub fn get_claim(&self, name: &str) -> Claim {
        self.claims.get_claim(name)
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }
}

/// Verifies identity tokens against a policy's signing keys and claims.
#[derive(Clone)]
pub struct TokenValidator {
    keys: KeyCache,
    leeway: Duration,
    enabled: bool,
}

impl TokenValidator {
    #[must_use]
    pub fn new(keys: KeyCache, leeway: Duration, enabled: bool) -> Self {
        Self {
            keys,
            leeway,
            enabled,
        }
    }

    /// Whether verification is switched on.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Parses and verifies `raw`, reporting only success.
    ///
    /// Always false while verification is disabled.
    pub async fn authenticate(&self, raw: &str, client_id: &str, policy: &Policy) -> bool {
        if !self.enabled {
            return false;
        }
        let result = match IdToken::parse(raw) {
            Ok(token) => self.verify(&token, client_id, policy).await,
            Err(report) => Err(report),
        };
        match result {
            Ok(_) => true,
            Err(report) => {
                warn!(policy = %policy.name(), error = %report, "identity token rejected");
                false
            }
        }
    }

    /// Checks signature, issuer, audience, expiry, issued-at and the policy claim.
    #[instrument(skip(self, token, policy), fields(policy = %policy.name()))]
    pub async fn verify(
        &self,
        token: &IdToken,
        client_id: &str,
        policy: &Policy,
    ) -> Result<TrustedClaims, Report<TokenError>> {
        let jwk = self
            .keys
            .signing_key(policy, token.header.kid.as_deref())
            .await?;
        let algorithm = algorithm_for(&jwk, token.header.alg)?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| TokenError::Signature {
            reason: format!("unusable signing key: {e}"),
        })?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_audience(&[client_id]);
        validation.set_issuer(&[policy.endpoints().issuer()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let decoded = jsonwebtoken::decode::<Map<String, Value>>(&token.raw, &key, &validation)
            .map_err(|e| map_jwt_error(&e))?;
        let claims = ClaimSet(decoded.claims);

        self.check_issued_at(&claims)?;

        let actual = claims.policy_identifier();
        if !actual
            .as_deref()
            .is_some_and(|claimed| policy.matches_identifier(claimed))
        {
            return Err(TokenError::PolicyMismatch {
                expected: policy.policy_id().to_string(),
                actual,
            }
            .into());
        }

        debug!("identity token verified");
        Ok(TrustedClaims::verified(claims))
    }

    fn check_issued_at(&self, claims: &ClaimSet) -> Result<(), Report<TokenError>> {
        let Some(iat) = claims.numeric("iat") else {
            return Err(TokenError::ClaimValidation {
                check: ClaimCheck::Missing("iat".to_string()),
            }
            .into());
        };
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        let latest = chrono::Utc::now().timestamp().saturating_add(leeway);
        if iat > latest {
            return Err(TokenError::ClaimValidation {
                check: ClaimCheck::IssuedAt,
            }
            .into());
        }
        Ok(())
    }
}

/// The key's declared algorithm wins; otherwise the header's, if accepted.
fn algorithm_for(jwk: &Jwk, header_alg: Algorithm) -> Result<Algorithm, Report<TokenError>> {
    let algorithm = match &jwk.common.key_algorithm {
        Some(KeyAlgorithm::RS256) => Algorithm::RS256,
        Some(KeyAlgorithm::RS384) => Algorithm::RS384,
        Some(KeyAlgorithm::RS512) => Algorithm::RS512,
        Some(other) => {
            return Err(TokenError::Signature {
                reason: format!("unsupported key algorithm {other:?}"),
            }
            .into());
        }
        None => header_alg,
    };
    if !ACCEPTED_ALGORITHMS.contains(&algorithm) {
        return Err(TokenError::Signature {
            reason: format!("algorithm {algorithm:?} is not accepted"),
        }
        .into());
    }
    Ok(algorithm)
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> Report<TokenError> {
    use jsonwebtoken::errors::ErrorKind;

    let claim = |check: ClaimCheck| TokenError::ClaimValidation { check };
    let error = match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::Signature {
            reason: err.to_string(),
        },
        ErrorKind::ExpiredSignature => claim(ClaimCheck::Expiry),
        ErrorKind::ImmatureSignature => claim(ClaimCheck::NotBefore),
        ErrorKind::InvalidIssuer => claim(ClaimCheck::Issuer),
        ErrorKind::InvalidAudience => claim(ClaimCheck::Audience),
        ErrorKind::MissingRequiredClaim(name) => claim(ClaimCheck::Missing(name.clone())),
        _ => TokenError::Malformed {
            reason: err.to_string(),
        },
    };
    error.into()
}
