//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys use
//! `__` as separator, e.g. `IDENTITY__POLICIES__ADMIN__POLICY_ID`.
//!
//! See [`IdentitySettings`] for the sign-in configuration.

use b2c_signin_identity::IdentitySettings;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Sign-in configuration.
    pub identity: IdentitySettings,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// Upper bound on the allowed token clock skew.
const MAX_CLOCK_LEEWAY_SECONDS: u64 = 3600;

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session duration in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_session_duration_minutes() -> i64 {
    60
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    /// Loads configuration from an explicit environment source.
    pub fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        for (name, path) in [
            ("identity.callback_path", &self.identity.callback_path),
            ("identity.profile_edit_path", &self.identity.profile_edit_path),
            ("identity.home_path", &self.identity.home_path),
        ] {
            if !path.starts_with('/') {
                return Err(config::ConfigError::Message(format!(
                    "{name} must start with '/', got '{path}'"
                )));
            }
        }
        if self.identity.clock_leeway_seconds > MAX_CLOCK_LEEWAY_SECONDS {
            return Err(config::ConfigError::Message(format!(
                "identity.clock_leeway_seconds must be at most {MAX_CLOCK_LEEWAY_SECONDS}, got {}",
                self.identity.clock_leeway_seconds
            )));
        }
        if self.session.duration_minutes <= 0 {
            return Err(config::ConfigError::Message(
                "session.duration_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
