//! The per-request sign-in state machine.
//!
//! ```text
//! Anonymous --login--------------> AwaitingProviderRedirect (generic)
//! Anonymous --logout-------------> AwaitingProviderRedirect (end session)
//! Anonymous --profile edit page--> AwaitingProviderRedirect (edit_profile)
//! AwaitingTokenCallback --token ok, admin role, non-admin acr--> StepUpRequired
//! AwaitingTokenCallback --token ok---------------------------> Authenticated
//! Authenticated --logout--> AwaitingProviderRedirect
//! ```
//!
//! Each entry point runs to completion within one request. Nothing is stored
//! between requests except what the provider carries back in `state`.

use crate::directory::{LocalUser, NewUser, ProfileUpdate, UserDirectory, normalize_email};
use crate::endpoint::{AuthorizationRequest, EndpointBuilder};
use crate::error::{DirectoryError, FlowError};
use crate::jwks::KeyCache;
use crate::policy::{IdentityConfig, Policy, PolicyName};
use crate::session::{Session, SessionEstablisher};
use crate::token::{IdToken, TokenValidator, TrustedClaims};
use b2c_signin_core::UserId;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

/// Where a flow step left the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Anonymous,
    AwaitingProviderRedirect,
    AwaitingTokenCallback,
    Authenticated,
    StepUpRequired,
}

/// The result of a flow step.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// Send the browser to the provider.
    Redirect { location: Url, state: FlowState },
    /// A session was established; send the browser home.
    SignedIn {
        user_id: UserId,
        session: Session,
        location: String,
    },
}

impl FlowOutcome {
    #[must_use]
    pub fn state(&self) -> FlowState {
        match self {
            Self::Redirect { state, .. } => *state,
            Self::SignedIn { .. } => FlowState::Authenticated,
        }
    }

    /// The 302 target.
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Redirect { location, .. } => location.as_str(),
            Self::SignedIn { location, .. } => location,
        }
    }
}

/// A request that might carry an identity token.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub path: String,
    pub id_token: Option<String>,
    pub state: Option<String>,
}

/// Orchestrates login, logout, profile editing and the token callback.
pub struct AuthFlow {
    config: Arc<IdentityConfig>,
    validator: TokenValidator,
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionEstablisher>,
}

impl AuthFlow {
    /// Creates the flow. All three policies must be configured and complete.
    pub fn new(
        config: Arc<IdentityConfig>,
        keys: KeyCache,
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionEstablisher>,
    ) -> Result<Self, Report<FlowError>> {
        config
            .policies()
            .ensure_complete()
            .map_err(|report| report.context(FlowError::Configuration))?;
        if !config.verify_tokens() {
            warn!("identity token verification is disabled; posted claims are trusted as-is");
        }
        let validator = TokenValidator::new(keys, config.clock_leeway(), config.verify_tokens());
        Ok(Self {
            config,
            validator,
            directory,
            sessions,
        })
    }

    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn policy(&self, name: PolicyName) -> Result<&Policy, Report<FlowError>> {
        self.config
            .policies()
            .get(name)
            .map_err(|report| report.context(FlowError::Configuration))
    }

    fn authorization_redirect(
        &self,
        name: PolicyName,
        state: FlowState,
    ) -> Result<FlowOutcome, Report<FlowError>> {
        let policy = self.policy(name)?;
        let request = AuthorizationRequest::new(name);
        let location = request
            .redirect_url(&EndpointBuilder::new(policy, self.config.response_mode()))
            .map_err(|report| report.context(FlowError::Configuration))?;
        Ok(FlowOutcome::Redirect { location, state })
    }

    /// Starts ordinary sign-in.
    pub fn login(&self) -> Result<FlowOutcome, Report<FlowError>> {
        info!(policy = %PolicyName::Generic, "redirecting to provider for sign-in");
        self.authorization_redirect(PolicyName::Generic, FlowState::AwaitingProviderRedirect)
    }

    /// Signs out at the provider. Local session invalidation is the caller's job.
    pub fn logout(&self) -> Result<FlowOutcome, Report<FlowError>> {
        let policy = self.policy(PolicyName::Generic)?;
        let location = EndpointBuilder::new(policy, self.config.response_mode())
            .end_session_endpoint()
            .map_err(|report| report.context(FlowError::Configuration))?;
        info!(policy = %PolicyName::Generic, "redirecting to provider for sign-out");
        Ok(FlowOutcome::Redirect {
            location,
            state: FlowState::AwaitingProviderRedirect,
        })
    }

    /// Starts the profile-edit journey when `path` is the profile-edit page.
    pub fn profile_edit(&self, path: &str) -> Result<Option<FlowOutcome>, Report<FlowError>> {
        if path != self.config.profile_edit_path() {
            return Ok(None);
        }
        info!(policy = %PolicyName::EditProfile, "redirecting to provider for profile edit");
        self.authorization_redirect(PolicyName::EditProfile, FlowState::AwaitingProviderRedirect)
            .map(Some)
    }

    /// Handles a posted identity token.
    ///
    /// Returns `Ok(None)` without side effects unless the request targets the
    /// callback path and carries an `id_token`.
    #[instrument(skip(self, request), fields(state = request.state.as_deref()))]
    pub async fn handle_callback(
        &self,
        request: &CallbackRequest,
    ) -> Result<Option<FlowOutcome>, Report<FlowError>> {
        let Some(raw) = request.id_token.as_deref() else {
            return Ok(None);
        };
        if request.path != self.config.callback_path() {
            return Ok(None);
        }

        let name = request
            .state
            .as_deref()
            .and_then(|state| state.parse::<PolicyName>().ok())
            .ok_or_else(|| FlowError::UnknownState {
                state: request.state.clone(),
            })?;
        let policy = self.policy(name)?;

        let claims = self.trusted_claims(raw, policy).await?;

        let email = claims
            .get_claim("emails")
            .first()
            .map(normalize_email)
            .filter(|email| !email.is_empty())
            .ok_or(FlowError::MissingClaim { claim: "emails" })?;

        let user = self.provision(name, &email, &claims).await?;

        let acr = claims.claims().policy_identifier();
        if user.roles().is_admin() {
            let admin = self.policy(PolicyName::Admin)?;
            if !acr.as_deref().is_some_and(|acr| admin.matches_identifier(acr)) {
                info!(
                    user_id = %user.id(),
                    acr = acr.as_deref().unwrap_or("<none>"),
                    "administrator signed in without the admin policy, stepping up"
                );
                return self
                    .authorization_redirect(PolicyName::Admin, FlowState::StepUpRequired)
                    .map(Some);
            }
        }

        let session = self
            .sessions
            .establish(user.id())
            .await
            .map_err(|report| report.context(FlowError::Session))?;
        info!(user_id = %user.id(), policy = %name, "user signed in");

        Ok(Some(FlowOutcome::SignedIn {
            user_id: user.id(),
            session,
            location: self.config.home_path().to_string(),
        }))
    }

    async fn trusted_claims(
        &self,
        raw: &str,
        policy: &Policy,
    ) -> Result<TrustedClaims, Report<FlowError>> {
        let token = IdToken::parse(raw).map_err(|report| {
            warn!(policy = %policy.name(), error = %report, "identity token rejected");
            report.context(FlowError::TokenRejected)
        })?;

        if !self.validator.enabled() {
            warn!(policy = %policy.name(), "accepting identity token without verification");
            return Ok(TrustedClaims::unverified(&token));
        }

        self.validator
            .verify(&token, policy.client_id(), policy)
            .await
            .map_err(|report| {
                warn!(policy = %policy.name(), error = %report, "identity token rejected");
                report.context(FlowError::TokenRejected)
            })
    }

    /// Finds, creates or updates the local user for `email`.
    async fn provision(
        &self,
        name: PolicyName,
        email: &str,
        claims: &TrustedClaims,
    ) -> Result<LocalUser, Report<FlowError>> {
        let directory_error = |report: Report<DirectoryError>| {
            report.context(FlowError::Directory)
        };

        let id = match self
            .directory
            .find_by_email(email)
            .await
            .map_err(directory_error)?
        {
            None => {
                let id = self
                    .directory
                    .create(NewUser::from_claims(email, claims))
                    .await
                    .map_err(directory_error)?;
                info!(user_id = %id, "provisioned new local user");
                id
            }
            Some(user) if name == PolicyName::EditProfile => {
                self.directory
                    .update(user.id(), ProfileUpdate::from_claims(claims))
                    .await
                    .map_err(directory_error)?;
                info!(user_id = %user.id(), "updated profile from edit_profile claims");
                user.id()
            }
            Some(user) => return Ok(user),
        };

        self.directory
            .find_by_id(id)
            .await
            .map_err(directory_error)?
            .ok_or_else(|| {
                DirectoryError::Corrupt {
                    details: format!("user {id} vanished after write"),
                }
                .into()
            })
            .map_err(directory_error)
    }
}
