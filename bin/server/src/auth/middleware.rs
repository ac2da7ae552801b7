//! Authentication extractors for Axum.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use b2c_signin_identity::{LocalUser, SessionId, UserDirectory};
use std::sync::Arc;

use super::{AppState, SESSION_COOKIE};

/// Extractor for optionally getting the signed-in user.
///
/// Missing, unknown or expired sessions all yield `None`; storage errors are
/// logged and treated the same way.
pub struct OptionalAuth(pub Option<LocalUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(OptionalAuth(None));
        };
        let session_id = SessionId::new(cookie.value().to_string());

        let session = match app_state.sessions.find_by_id(&session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(OptionalAuth(None)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load session");
                return Ok(OptionalAuth(None));
            }
        };

        if session.is_expired() {
            let _ = app_state.sessions.delete(&session_id).await;
            return Ok(OptionalAuth(None));
        }

        match app_state.users.find_by_id(session.user_id()).await {
            Ok(user) => Ok(OptionalAuth(user)),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %session.user_id(), "failed to load session user");
                Ok(OptionalAuth(None))
            }
        }
    }
}
