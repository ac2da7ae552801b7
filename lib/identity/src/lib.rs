//! Policy-based OpenID Connect sign-in for b2c-signin.
//!
//! This crate provides:
//! - Policy configuration for the three named user journeys (`PolicyName`,
//!   `PolicyRegistry`, `IdentityConfig`)
//! - Authorization and end-session URL construction (`EndpointBuilder`)
//! - Identity token validation against cached provider keys (`TokenValidator`,
//!   `KeyCache`)
//! - The sign-in state machine with provisioning and step-up (`AuthFlow`)
//! - Contracts for the user directory and session store the host provides
//!
//! # Example
//!
//! ```
//! use b2c_signin_identity::{EndpointBuilder, AuthorizationRequest, Policy, PolicyName};
//!
//! let policy = Policy::new(
//!     PolicyName::Generic,
//!     "https://contoso.b2clogin.com/contoso.onmicrosoft.com".to_string(),
//!     "client-123".to_string(),
//!     "B2C_1_signin".to_string(),
//!     "https://app.example.com/b2c-token-verification".to_string(),
//! );
//!
//! let request = AuthorizationRequest::new(PolicyName::Generic);
//! let url = request
//!     .redirect_url(&EndpointBuilder::new(&policy, "id_token"))
//!     .unwrap();
//!
//! assert!(url.as_str().contains("state=generic"));
//! assert!(url.as_str().contains("policy=B2C_1_signin"));
//! ```

pub mod directory;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod policy;
pub mod role;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_support;

pub use directory::{LocalUser, NewUser, ProfileUpdate, UserDirectory};
pub use endpoint::{AuthorizationRequest, EndpointBuilder};
pub use error::{
    ClaimCheck, ConfigurationError, DirectoryError, FlowError, SessionError, TokenError,
};
pub use flow::{AuthFlow, CallbackRequest, FlowOutcome, FlowState};
pub use jwks::KeyCache;
pub use policy::{
    IdentityConfig, IdentitySettings, Policy, PolicyName, PolicyRegistry, PolicySettings,
    PolicySettingsSet, ProviderEndpoints,
};
pub use role::{Role, RoleSet};
pub use session::{Session, SessionEstablisher, SessionId};
pub use token::{Claim, ClaimSet, IdToken, Provenance, TokenValidator, TrustedClaims};
