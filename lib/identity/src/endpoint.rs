//! Authorization and end-session URL construction.
//!
//! Pure construction: endpoints were resolved when the configuration loaded,
//! so nothing here touches the network.

use crate::error::ConfigurationError;
use crate::policy::{Policy, PolicyName};
use openidconnect::Nonce;
use rootcause::prelude::Report;
use url::Url;

const RESPONSE_TYPE: &str = "id_token";
const SCOPE: &str = "openid";

/// Builds provider URLs for one policy.
#[derive(Debug, Clone, Copy)]
pub struct EndpointBuilder<'a> {
    policy: &'a Policy,
    response_mode: &'a str,
}

impl<'a> EndpointBuilder<'a> {
    #[must_use]
    pub fn new(policy: &'a Policy, response_mode: &'a str) -> Self {
        Self {
            policy,
            response_mode,
        }
    }

    /// The authorization URL without `state`; callers append their own.
    pub fn authorization_endpoint(&self) -> Result<Url, Report<ConfigurationError>> {
        self.policy.ensure_complete()?;
        let mut url = self.parse(
            self.policy.endpoints().authorization_endpoint(),
            "authorization endpoint",
        )?;
        url.query_pairs_mut()
            .append_pair("client_id", self.policy.client_id())
            .append_pair("redirect_uri", self.policy.redirect_uri())
            .append_pair("response_mode", self.response_mode)
            .append_pair("response_type", RESPONSE_TYPE)
            .append_pair("scope", SCOPE)
            .append_pair("policy", self.policy.policy_id());
        Ok(url)
    }

    /// The provider's sign-out URL.
    pub fn end_session_endpoint(&self) -> Result<Url, Report<ConfigurationError>> {
        self.policy.ensure_complete()?;
        let mut url = self.parse(
            self.policy.endpoints().end_session_endpoint(),
            "end-session endpoint",
        )?;
        url.query_pairs_mut()
            .append_pair("policy", self.policy.policy_id())
            .append_pair(
                "post_logout_redirect_uri",
                self.policy.post_logout_redirect_uri(),
            );
        Ok(url)
    }

    fn parse(&self, raw: &str, field: &'static str) -> Result<Url, Report<ConfigurationError>> {
        Url::parse(raw).map_err(|e| {
            ConfigurationError::InvalidUrl {
                policy: self.policy.name(),
                field,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// One login attempt against a policy.
///
/// Nothing is persisted; the policy name travels through the provider as
/// `state` and comes back with the token.
///
/// The nonce is sent because the provider expects one, but it is not kept, so
/// the returned token's `nonce` claim is never compared and gives no replay
/// protection. Replayed tokens are bounded only by `exp`.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    policy: PolicyName,
    nonce: String,
}

impl AuthorizationRequest {
    /// Starts a request for `policy` with a fresh nonce.
    #[must_use]
    pub fn new(policy: PolicyName) -> Self {
        Self {
            policy,
            nonce: Nonce::new_random().secret().clone(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> PolicyName {
        self.policy
    }

    /// The `state` value, always the policy name.
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.policy.as_str()
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// The full redirect target for this request.
    pub fn redirect_url(
        &self,
        builder: &EndpointBuilder<'_>,
    ) -> Result<Url, Report<ConfigurationError>> {
        let mut url = builder.authorization_endpoint()?;
        url.query_pairs_mut()
            .append_pair("state", self.state())
            .append_pair("nonce", &self.nonce);
        Ok(url)
    }
}
