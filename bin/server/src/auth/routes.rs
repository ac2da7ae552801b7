//! Authentication routes for login, logout, profile editing and the token callback.

use axum::{
    Form,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use b2c_signin_identity::{CallbackRequest, FlowError, FlowOutcome, SessionId};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::{AppState, OptionalAuth, SESSION_COOKIE};

/// Form fields the provider posts to the callback path.
#[derive(Debug, Deserialize)]
pub struct TokenCallbackForm {
    id_token: Option<String>,
    state: Option<String>,
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}

/// Redirects to the provider with the generic policy.
pub async fn login(State(state): State<Arc<AppState>>) -> Result<Response, AuthError> {
    let outcome = state.flow.login()?;
    Ok(found(outcome.location()))
}

/// Deletes the local session and signs out at the provider.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        let session_id = SessionId::new(session_cookie.value().to_string());
        if let Err(e) = state.sessions.delete(&session_id).await {
            tracing::warn!(error = %e, "failed to delete session on logout");
        }
    }

    let outcome = state.flow.logout()?;
    Ok((jar.add(removal_cookie()), found(outcome.location())))
}

/// Redirects to the provider's profile-edit journey.
pub async fn edit_profile(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Response, AuthError> {
    match state.flow.profile_edit(uri.path())? {
        Some(outcome) => Ok(found(outcome.location())),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// Accepts the identity token posted by the provider.
pub async fn token_callback(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    jar: CookieJar,
    Form(form): Form<TokenCallbackForm>,
) -> Result<Response, AuthError> {
    let request = CallbackRequest {
        path: uri.path().to_string(),
        id_token: form.id_token,
        state: form.state,
    };

    match state.flow.handle_callback(&request).await? {
        None => Ok((StatusCode::BAD_REQUEST, "Missing id_token").into_response()),
        Some(FlowOutcome::SignedIn {
            session, location, ..
        }) => {
            let minutes = state.session_config.duration_minutes;
            let session_cookie = Cookie::build((SESSION_COOKIE, session.id().as_str().to_string()))
                .path("/")
                .http_only(true)
                .secure(state.session_config.secure_cookies)
                .same_site(SameSite::Lax)
                .max_age(TimeDuration::minutes(minutes));
            Ok((jar.add(session_cookie), found(&location)).into_response())
        }
        Some(outcome) => Ok(found(outcome.location())),
    }
}

/// Shows who is signed in.
pub async fn home(OptionalAuth(user): OptionalAuth) -> impl IntoResponse {
    match user {
        Some(user) => format!("Signed in as {} <{}>", user.display_name(), user.email()),
        None => "Not signed in. Visit /auth/login to sign in.".to_string(),
    }
}

/// A failed flow step, rendered as an HTTP response.
#[derive(Debug)]
pub struct AuthError(Report<FlowError>);

impl From<Report<FlowError>> for AuthError {
    fn from(report: Report<FlowError>) -> Self {
        Self(report)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.current_context() {
            FlowError::TokenRejected => {
                tracing::warn!(error = %self.0, "Token validation failed");
                (StatusCode::UNAUTHORIZED, "Token validation error")
            }
            FlowError::UnknownState { .. } => {
                tracing::warn!(error = %self.0, "Callback with unknown state");
                (StatusCode::BAD_REQUEST, "Unknown sign-in state")
            }
            FlowError::MissingClaim { .. } => {
                tracing::warn!(error = %self.0, "Token missing identifying claim");
                (StatusCode::BAD_REQUEST, "Token is missing required claims")
            }
            FlowError::Configuration | FlowError::Directory | FlowError::Session => {
                tracing::error!(error = %self.0, "Sign-in failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}
