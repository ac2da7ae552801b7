//! Policy configuration.
//!
//! A policy is a named identity-provider user journey. Exactly three exist:
//! ordinary sign-in, administrative sign-in and profile editing. Settings are
//! deserialized once at start-up (see [`IdentitySettings`]) and resolved into an
//! immutable [`IdentityConfig`] that is passed explicitly to every component.

use crate::discovery;
use crate::error::ConfigurationError;
use openidconnect::RedirectUrl;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// The three named policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    /// Ordinary sign-in / sign-up.
    Generic,
    /// Stronger sign-in required for administrators.
    Admin,
    /// Profile editing.
    EditProfile,
}

impl PolicyName {
    /// Every policy, in configuration order.
    pub const ALL: [PolicyName; 3] = [Self::Generic, Self::Admin, Self::EditProfile];

    /// The wire name, also used as the `state` parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Admin => "admin",
            Self::EditProfile => "edit_profile",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string that names none of the three policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicyName(pub String);

impl fmt::Display for UnknownPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown policy name '{}'", self.0)
    }
}

impl std::error::Error for UnknownPolicyName {}

impl FromStr for PolicyName {
    type Err = UnknownPolicyName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Self::Generic),
            "admin" => Ok(Self::Admin),
            "edit_profile" => Ok(Self::EditProfile),
            other => Err(UnknownPolicyName(other.to_string())),
        }
    }
}

/// Identity settings as loaded from the environment.
///
/// Fields with defaults can be omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Tenant authority URL, e.g. `https://contoso.b2clogin.com/contoso.onmicrosoft.com`.
    /// Policies inherit it unless they set their own.
    #[serde(default)]
    pub tenant: String,
    /// Application (client) ID registered with the provider.
    #[serde(default)]
    pub client_id: String,
    /// Expected token issuer, e.g. `https://contoso.b2clogin.com/{tenant-guid}/v2.0/`.
    ///
    /// Names the tenant GUID, so it cannot be derived from `tenant`. Required
    /// unless `discover` is set or every policy sets its own.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Whether identity tokens are cryptographically verified.
    ///
    /// Turning this off trusts posted claims unconditionally.
    #[serde(default = "default_verify_tokens")]
    pub verify_tokens: bool,
    /// The only path on which identity tokens are accepted.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Requests for this path start the profile-edit journey.
    #[serde(default = "default_profile_edit_path")]
    pub profile_edit_path: String,
    /// Where users land after signing in.
    #[serde(default = "default_home_path")]
    pub home_path: String,
    /// Value of the `response_mode` authorization parameter.
    #[serde(default = "default_response_mode")]
    pub response_mode: String,
    /// Allowed clock skew when checking `exp`/`iat`.
    #[serde(default = "default_clock_leeway_seconds")]
    pub clock_leeway_seconds: u64,
    /// Resolve endpoints from the provider's discovery document at start-up.
    #[serde(default)]
    pub discover: bool,
    /// Per-policy settings.
    #[serde(default)]
    pub policies: PolicySettingsSet,
}

fn default_verify_tokens() -> bool {
    true
}

fn default_callback_path() -> String {
    "/b2c-token-verification".to_string()
}

fn default_profile_edit_path() -> String {
    "/profile".to_string()
}

fn default_home_path() -> String {
    "/".to_string()
}

fn default_response_mode() -> String {
    "id_token".to_string()
}

fn default_clock_leeway_seconds() -> u64 {
    300
}

/// Settings for each of the three policies; absent entries are unconfigured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettingsSet {
    #[serde(default)]
    pub generic: Option<PolicySettings>,
    #[serde(default)]
    pub admin: Option<PolicySettings>,
    #[serde(default)]
    pub edit_profile: Option<PolicySettings>,
}

impl PolicySettingsSet {
    /// Returns the settings for `name`, if configured.
    #[must_use]
    pub fn get(&self, name: PolicyName) -> Option<&PolicySettings> {
        match name {
            PolicyName::Generic => self.generic.as_ref(),
            PolicyName::Admin => self.admin.as_ref(),
            PolicyName::EditProfile => self.edit_profile.as_ref(),
        }
    }
}

/// Settings for one policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Policy identifier at the provider, e.g. `B2C_1_signin`.
    pub policy_id: String,
    /// Where the provider posts the identity token.
    pub redirect_uri: String,
    /// Where the provider sends the browser after sign-out.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    /// Overrides the shared tenant.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Overrides the shared client ID.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Explicit expected issuer.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Explicit authorization endpoint.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Explicit end-session endpoint.
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    /// Explicit signing key set URI.
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

/// Provider endpoints for one policy, resolved at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    issuer: String,
    authorization_endpoint: String,
    end_session_endpoint: String,
    jwks_uri: String,
}

impl ProviderEndpoints {
    /// Creates endpoints from explicit values.
    #[must_use]
    pub fn new(
        issuer: String,
        authorization_endpoint: String,
        end_session_endpoint: String,
        jwks_uri: String,
    ) -> Self {
        Self {
            issuer,
            authorization_endpoint,
            end_session_endpoint,
            jwks_uri,
        }
    }

    /// Derives the conventional B2C endpoints under a tenant authority.
    ///
    /// The issuer is left empty: B2C issues tokens under the tenant GUID,
    /// which the authority does not carry. An empty tenant yields empty
    /// endpoints; the policy is then incomplete.
    #[must_use]
    pub fn derive(tenant: &str, policy_id: &str) -> Self {
        let authority = tenant.trim_end_matches('/');
        if authority.is_empty() {
            return Self::new(String::new(), String::new(), String::new(), String::new());
        }
        Self {
            issuer: String::new(),
            authorization_endpoint: format!("{authority}/{policy_id}/oauth2/v2.0/authorize"),
            end_session_endpoint: format!("{authority}/{policy_id}/oauth2/v2.0/logout"),
            jwks_uri: format!("{authority}/{policy_id}/discovery/v2.0/keys"),
        }
    }

    /// Replaces any endpoint the settings name explicitly.
    #[must_use]
    pub fn with_overrides(mut self, settings: &PolicySettings) -> Self {
        if let Some(issuer) = &settings.issuer {
            self.issuer = issuer.clone();
        }
        if let Some(endpoint) = &settings.authorization_endpoint {
            self.authorization_endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &settings.end_session_endpoint {
            self.end_session_endpoint = endpoint.clone();
        }
        if let Some(uri) = &settings.jwks_uri {
            self.jwks_uri = uri.clone();
        }
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> &str {
        &self.authorization_endpoint
    }

    #[must_use]
    pub fn end_session_endpoint(&self) -> &str {
        &self.end_session_endpoint
    }

    #[must_use]
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }
}

/// A fully resolved policy. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: PolicyName,
    tenant: String,
    client_id: String,
    policy_id: String,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    endpoints: ProviderEndpoints,
}

impl Policy {
    /// Creates a policy with endpoints derived from the tenant.
    ///
    /// The post-logout redirect defaults to the redirect URI.
    #[must_use]
    pub fn new(
        name: PolicyName,
        tenant: String,
        client_id: String,
        policy_id: String,
        redirect_uri: String,
    ) -> Self {
        let endpoints = ProviderEndpoints::derive(&tenant, &policy_id);
        Self {
            name,
            tenant,
            client_id,
            policy_id,
            post_logout_redirect_uri: redirect_uri.clone(),
            redirect_uri,
            endpoints,
        }
    }

    /// Replaces the resolved endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets where the provider returns the browser after sign-out.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: String) -> Self {
        self.post_logout_redirect_uri = uri;
        self
    }

    fn from_settings(
        name: PolicyName,
        shared: &IdentitySettings,
        settings: &PolicySettings,
    ) -> Result<Self, Report<ConfigurationError>> {
        let tenant = settings
            .tenant
            .clone()
            .unwrap_or_else(|| shared.tenant.clone());
        let client_id = settings
            .client_id
            .clone()
            .unwrap_or_else(|| shared.client_id.clone());

        if !tenant.is_empty() {
            Url::parse(&tenant).map_err(|e| ConfigurationError::InvalidUrl {
                policy: name,
                field: "tenant",
                reason: e.to_string(),
            })?;
        }
        RedirectUrl::new(settings.redirect_uri.clone()).map_err(|e| {
            ConfigurationError::InvalidUrl {
                policy: name,
                field: "redirect URI",
                reason: e.to_string(),
            }
        })?;

        let mut policy = Self::new(
            name,
            tenant,
            client_id,
            settings.policy_id.clone(),
            settings.redirect_uri.clone(),
        );
        if let Some(issuer) = &shared.issuer {
            policy.endpoints.issuer = issuer.clone();
        }
        policy.endpoints = policy.endpoints.with_overrides(settings);
        if let Some(uri) = &settings.post_logout_redirect_uri {
            policy.post_logout_redirect_uri = uri.clone();
        }
        Ok(policy)
    }

    /// Fails if the tenant or client ID is missing.
    pub fn ensure_complete(&self) -> Result<(), Report<ConfigurationError>> {
        let missing = if self.tenant.trim().is_empty() {
            Some("tenant")
        } else if self.client_id.trim().is_empty() {
            Some("client ID")
        } else if self.policy_id.trim().is_empty() {
            Some("policy identifier")
        } else {
            None
        };
        match missing {
            Some(field) => Err(ConfigurationError::IncompletePolicy {
                policy: self.name,
                field,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Fails if no issuer was configured or discovered.
    pub fn ensure_issuer(&self) -> Result<(), Report<ConfigurationError>> {
        if self.endpoints.issuer.trim().is_empty() {
            return Err(ConfigurationError::IncompletePolicy {
                policy: self.name,
                field: "issuer",
            }
            .into());
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> PolicyName {
        self.name
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The provider-side policy identifier (compared against `acr`).
    #[must_use]
    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn post_logout_redirect_uri(&self) -> &str {
        &self.post_logout_redirect_uri
    }

    #[must_use]
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    /// True if `claimed` names this policy. The provider lower-cases `acr`.
    #[must_use]
    pub fn matches_identifier(&self, claimed: &str) -> bool {
        self.policy_id.eq_ignore_ascii_case(claimed)
    }
}

/// The configured policies, one per name.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<PolicyName, Policy>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the policy with the same name.
    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.insert(policy.name(), policy);
        self
    }

    /// Returns the named policy.
    pub fn get(&self, name: PolicyName) -> Result<&Policy, Report<ConfigurationError>> {
        self.policies
            .get(&name)
            .ok_or_else(|| ConfigurationError::MissingPolicy { policy: name }.into())
    }

    /// Fails unless all three policies are configured and complete,
    /// including a known issuer.
    pub fn ensure_complete(&self) -> Result<(), Report<ConfigurationError>> {
        for name in PolicyName::ALL {
            let policy = self.get(name)?;
            policy.ensure_complete()?;
            policy.ensure_issuer()?;
        }
        Ok(())
    }

    fn get_mut(&mut self, name: PolicyName) -> Option<&mut Policy> {
        self.policies.get_mut(&name)
    }
}

/// Immutable sign-in configuration, built once at start-up.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    policies: PolicyRegistry,
    verify_tokens: bool,
    callback_path: String,
    profile_edit_path: String,
    home_path: String,
    response_mode: String,
    clock_leeway: Duration,
}

impl IdentityConfig {
    /// Creates a configuration with default paths and token verification on.
    #[must_use]
    pub fn new(policies: PolicyRegistry) -> Self {
        Self {
            policies,
            verify_tokens: default_verify_tokens(),
            callback_path: default_callback_path(),
            profile_edit_path: default_profile_edit_path(),
            home_path: default_home_path(),
            response_mode: default_response_mode(),
            clock_leeway: Duration::from_secs(default_clock_leeway_seconds()),
        }
    }

    /// Resolves settings using statically known endpoints.
    pub fn from_settings(settings: &IdentitySettings) -> Result<Self, Report<ConfigurationError>> {
        let mut policies = PolicyRegistry::new();
        for name in PolicyName::ALL {
            if let Some(policy_settings) = settings.policies.get(name) {
                policies = policies.with_policy(Policy::from_settings(
                    name,
                    settings,
                    policy_settings,
                )?);
            }
        }

        Ok(Self {
            policies,
            verify_tokens: settings.verify_tokens,
            callback_path: settings.callback_path.clone(),
            profile_edit_path: settings.profile_edit_path.clone(),
            home_path: settings.home_path.clone(),
            response_mode: settings.response_mode.clone(),
            clock_leeway: Duration::from_secs(settings.clock_leeway_seconds),
        })
    }

    /// Resolves settings, fetching discovery documents when `discover` is set.
    ///
    /// Explicitly configured endpoints win over discovered ones.
    pub async fn load(
        settings: &IdentitySettings,
        http: &reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        let mut config = Self::from_settings(settings)?;
        if !settings.discover {
            return Ok(config);
        }

        for name in PolicyName::ALL {
            let (Some(policy), Some(policy_settings)) =
                (config.policies.get_mut(name), settings.policies.get(name))
            else {
                continue;
            };
            let discovered = discovery::discover(http, policy).await?;
            policy.endpoints = discovered.with_overrides(policy_settings);
        }
        Ok(config)
    }

    /// Sets the verify-tokens switch.
    #[must_use]
    pub fn with_verify_tokens(mut self, verify: bool) -> Self {
        self.verify_tokens = verify;
        self
    }

    /// Sets the callback path.
    #[must_use]
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    /// Sets the profile-edit path.
    #[must_use]
    pub fn with_profile_edit_path(mut self, path: impl Into<String>) -> Self {
        self.profile_edit_path = path.into();
        self
    }

    #[must_use]
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    #[must_use]
    pub fn verify_tokens(&self) -> bool {
        self.verify_tokens
    }

    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    #[must_use]
    pub fn profile_edit_path(&self) -> &str {
        &self.profile_edit_path
    }

    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    #[must_use]
    pub fn response_mode(&self) -> &str {
        &self.response_mode
    }

    #[must_use]
    pub fn clock_leeway(&self) -> Duration {
        self.clock_leeway
    }
}
