//! Authentication module for the b2c-signin server.
//!
//! This module provides:
//! - HTTP routes driving the sign-in flow (login, logout, profile edit, token callback)
//! - Postgres-backed user directory and session store
//! - An extractor for the signed-in user
//!
//! All authentication decisions are made by [`AuthFlow`]; the handlers here
//! translate its outcomes into redirects and cookies.

pub mod db;
pub mod middleware;
pub mod routes;

use crate::config::SessionConfig;
use b2c_signin_identity::AuthFlow;
use db::{PgUserDirectory, SessionRepository};

pub use middleware::OptionalAuth;
pub use routes::{edit_profile, home, login, logout, token_callback};

/// Session cookie name.
pub(crate) const SESSION_COOKIE: &str = "session";

/// Shared application state.
pub struct AppState {
    /// The sign-in state machine.
    pub flow: AuthFlow,
    /// Local user directory.
    pub users: PgUserDirectory,
    /// Session store.
    pub sessions: SessionRepository,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        flow: AuthFlow,
        users: PgUserDirectory,
        sessions: SessionRepository,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            flow,
            users,
            sessions,
            session_config,
        }
    }
}
