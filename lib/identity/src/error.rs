//! Error types for the identity crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConfigurationError`: missing or incomplete policy configuration
//! - `TokenError`: identity token rejected (malformed, bad signature, bad claims)
//! - `DirectoryError` / `SessionError`: failures reported by external collaborators
//! - `FlowError`: what the sign-in flow reports to the hosting environment, with
//!   the lower-layer report attached as its cause

use crate::policy::PolicyName;
use std::fmt;

/// Missing or unusable policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The named policy was never configured.
    MissingPolicy { policy: PolicyName },
    /// The policy is configured but lacks a tenant or client ID.
    IncompletePolicy { policy: PolicyName, field: &'static str },
    /// A configured URL could not be parsed.
    InvalidUrl {
        policy: PolicyName,
        field: &'static str,
        reason: String,
    },
    /// Fetching the provider's discovery document failed.
    Discovery { policy: PolicyName, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPolicy { policy } => {
                write!(f, "policy '{policy}' is not configured")
            }
            Self::IncompletePolicy { policy, field } => {
                write!(f, "policy '{policy}' is missing its {field}")
            }
            Self::InvalidUrl {
                policy,
                field,
                reason,
            } => {
                write!(f, "policy '{policy}' has an invalid {field}: {reason}")
            }
            Self::Discovery { policy, reason } => {
                write!(f, "discovery for policy '{policy}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A standard claim check that an identity token failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimCheck {
    /// `iss` does not match the policy's issuer.
    Issuer,
    /// `aud` does not contain the client ID.
    Audience,
    /// `exp` is in the past.
    Expiry,
    /// `iat` is too far in the future.
    IssuedAt,
    /// `nbf` is in the future.
    NotBefore,
    /// A required claim is absent.
    Missing(String),
}

impl fmt::Display for ClaimCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issuer => write!(f, "issuer (iss) mismatch"),
            Self::Audience => write!(f, "audience (aud) mismatch"),
            Self::Expiry => write!(f, "token expired (exp)"),
            Self::IssuedAt => write!(f, "issued-at (iat) is in the future"),
            Self::NotBefore => write!(f, "token not yet valid (nbf)"),
            Self::Missing(claim) => write!(f, "required claim '{claim}' is missing"),
        }
    }
}

/// Reasons an identity token is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not a well-formed JWS compact serialization.
    Malformed { reason: String },
    /// The signature does not verify against the provider's keys.
    Signature { reason: String },
    /// A standard claim check failed.
    ClaimValidation { check: ClaimCheck },
    /// The token was produced by a different policy than expected.
    PolicyMismatch {
        expected: String,
        actual: Option<String>,
    },
    /// The signing keys for the policy could not be fetched.
    KeyResolution { policy: PolicyName, reason: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed token: {reason}"),
            Self::Signature { reason } => write!(f, "signature rejected: {reason}"),
            Self::ClaimValidation { check } => write!(f, "claim validation failed: {check}"),
            Self::PolicyMismatch { expected, actual } => match actual {
                Some(actual) => {
                    write!(f, "token issued for policy '{actual}', expected '{expected}'")
                }
                None => write!(f, "token carries no policy claim, expected '{expected}'"),
            },
            Self::KeyResolution { policy, reason } => {
                write!(f, "could not resolve signing keys for '{policy}': {reason}")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// Failures reported by the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The backing store could not be reached or the query failed.
    Unavailable { details: String },
    /// A stored record could not be decoded.
    Corrupt { details: String },
    /// A user with this email already exists.
    Conflict { email: String },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "user directory unavailable: {details}"),
            Self::Corrupt { details } => write!(f, "corrupt user record: {details}"),
            Self::Conflict { email } => write!(f, "a user with email '{email}' already exists"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Failures reported by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session could not be persisted or loaded.
    Storage { details: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { details } => write!(f, "session storage error: {details}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Fatal outcomes of a sign-in flow step.
///
/// Every variant terminates the current request; the user restarts from login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Policy configuration is missing or incomplete.
    Configuration,
    /// The callback `state` does not name a known policy.
    UnknownState { state: Option<String> },
    /// The identity token failed validation.
    TokenRejected,
    /// A claim needed to identify the user is absent.
    MissingClaim { claim: &'static str },
    /// The user directory failed.
    Directory,
    /// The session could not be established.
    Session,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "sign-in is not configured"),
            Self::UnknownState { state: Some(state) } => {
                write!(f, "unknown sign-in state '{state}'")
            }
            Self::UnknownState { state: None } => write!(f, "sign-in state is missing"),
            Self::TokenRejected => write!(f, "token validation error"),
            Self::MissingClaim { claim } => write!(f, "token has no usable '{claim}' claim"),
            Self::Directory => write!(f, "user directory error"),
            Self::Session => write!(f, "could not establish session"),
        }
    }
}

impl std::error::Error for FlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_policy() {
        let err = ConfigurationError::MissingPolicy {
            policy: PolicyName::Admin,
        };
        assert_eq!(err.to_string(), "policy 'admin' is not configured");

        let err = ConfigurationError::IncompletePolicy {
            policy: PolicyName::Generic,
            field: "client ID",
        };
        assert!(err.to_string().contains("client ID"));
    }

    #[test]
    fn claim_validation_names_failed_check() {
        let err = TokenError::ClaimValidation {
            check: ClaimCheck::Audience,
        };
        assert!(err.to_string().contains("aud"));

        let err = TokenError::ClaimValidation {
            check: ClaimCheck::Missing("iat".to_string()),
        };
        assert!(err.to_string().contains("'iat'"));
    }

    #[test]
    fn policy_mismatch_display() {
        let err = TokenError::PolicyMismatch {
            expected: "B2C_1_admin".to_string(),
            actual: Some("b2c_1_signin".to_string()),
        };
        assert!(err.to_string().contains("b2c_1_signin"));
        assert!(err.to_string().contains("B2C_1_admin"));

        let err = TokenError::PolicyMismatch {
            expected: "B2C_1_admin".to_string(),
            actual: None,
        };
        assert!(err.to_string().contains("no policy claim"));
    }

    #[test]
    fn unknown_state_display() {
        let err = FlowError::UnknownState {
            state: Some("superuser".to_string()),
        };
        assert!(err.to_string().contains("superuser"));
        assert!(
            FlowError::UnknownState { state: None }
                .to_string()
                .contains("missing")
        );
    }
}
