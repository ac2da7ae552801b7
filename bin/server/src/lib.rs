//! b2c-signin web server.
//!
//! Hosts the sign-in flow from `b2c-signin-identity` behind axum routes, with
//! users and sessions stored in Postgres.

pub mod auth;
pub mod config;

use auth::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the application router.
///
/// The callback and profile-edit routes are mounted at the configured paths.
pub fn router(state: Arc<AppState>) -> Router {
    let identity = state.flow.config();
    let callback_path = identity.callback_path().to_string();
    let profile_edit_path = identity.profile_edit_path().to_string();

    Router::new()
        .route("/", get(auth::home))
        .route("/auth/login", get(auth::login))
        .route("/auth/logout", get(auth::logout))
        .route(&profile_edit_path, get(auth::edit_profile))
        .route(&callback_path, post(auth::token_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::db::{PgUserDirectory, SessionRepository};
    use crate::config::SessionConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use b2c_signin_identity::{AuthFlow, IdentityConfig, IdentitySettings, KeyCache};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn settings() -> IdentitySettings {
        serde_json::from_value(serde_json::json!({
            "tenant": "https://contoso.b2clogin.com/contoso.onmicrosoft.com",
            "client_id": "client-123",
            "issuer": "https://contoso.b2clogin.com/tenant-guid/v2.0/",
            "policies": {
                "generic": {
                    "policy_id": "B2C_1_signin",
                    "redirect_uri": "https://app.example.com/b2c-token-verification"
                },
                "admin": {
                    "policy_id": "B2C_1_admin",
                    "redirect_uri": "https://app.example.com/b2c-token-verification"
                },
                "edit_profile": {
                    "policy_id": "B2C_1_edit",
                    "redirect_uri": "https://app.example.com/b2c-token-verification",
                    "post_logout_redirect_uri": "https://app.example.com/"
                }
            }
        }))
        .expect("settings")
    }

    /// The pool never connects; these tests only take paths that stay off the database.
    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/b2c_signin_test")
            .expect("lazy pool");
        let users = PgUserDirectory::new(pool.clone());
        let sessions = SessionRepository::new(pool, chrono::Duration::minutes(60));
        let identity = IdentityConfig::from_settings(&settings()).expect("identity");
        let flow = AuthFlow::new(
            Arc::new(identity),
            KeyCache::new(reqwest::Client::new()),
            Arc::new(users.clone()),
            Arc::new(sessions.clone()),
        )
        .expect("flow");
        router(Arc::new(AppState::new(
            flow,
            users,
            sessions,
            SessionConfig::default(),
        )))
    }

    fn location(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn body(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn post_form(path: &str, form: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn login_redirects_to_generic_policy() {
        let response = app()
            .oneshot(Request::get("/auth/login").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = location(&response);
        assert!(location.contains("/B2C_1_signin/oauth2/v2.0/authorize"));
        assert!(location.contains("state=generic"));
    }

    #[tokio::test]
    async fn logout_without_session_redirects_to_end_session() {
        let response = app()
            .oneshot(Request::get("/auth/logout").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).contains("/oauth2/v2.0/logout"));
    }

    #[tokio::test]
    async fn profile_page_redirects_to_edit_profile_policy() {
        let response = app()
            .oneshot(Request::get("/profile").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = location(&response);
        assert!(location.contains("state=edit_profile"));
        assert!(location.contains("policy=B2C_1_edit"));
    }

    #[tokio::test]
    async fn malformed_token_is_unauthorized() {
        let response = app()
            .oneshot(post_form(
                "/b2c-token-verification",
                "id_token=not-a-token&state=generic",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(response).await, "Token validation error");
    }

    #[tokio::test]
    async fn unknown_state_is_a_bad_request() {
        let response = app()
            .oneshot(post_form(
                "/b2c-token-verification",
                "id_token=a.b.c&state=superuser",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_without_token_is_a_bad_request() {
        let response = app()
            .oneshot(post_form("/b2c-token-verification", "state=generic"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await, "Missing id_token");
    }

    #[tokio::test]
    async fn tokens_posted_elsewhere_are_not_accepted() {
        let response = app()
            .oneshot(post_form("/wp-login", "id_token=a.b.c&state=generic"))
            .await
            .expect("response");

        assert!(response.status().is_client_error());
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn home_without_session_is_anonymous() {
        let response = app()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.contains("Not signed in"));
    }
}
