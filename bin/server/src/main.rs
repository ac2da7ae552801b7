use b2c_signin_identity::{AuthFlow, IdentityConfig, KeyCache, jwks::DEFAULT_FETCH_TIMEOUT};
use b2c_signin_server::{
    auth::{
        AppState,
        db::{PgUserDirectory, SessionRepository},
    },
    config::ServerConfig,
    router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let session_repo = SessionRepository::new(
        db_pool.clone(),
        chrono::Duration::minutes(config.session.duration_minutes),
    );

    // Cleanup expired sessions on startup
    match session_repo.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(
                deleted_sessions = count,
                "Cleaned up expired sessions on startup"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired sessions on startup");
        }
    }

    // Spawn periodic session cleanup task
    let cleanup_repo = session_repo.clone();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup_repo.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });

    // Resolve policies, discovering provider endpoints if configured
    let http = reqwest::Client::builder()
        .timeout(DEFAULT_FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build HTTP client");
    tracing::info!(discover = config.identity.discover, "Loading identity policies...");
    let identity = IdentityConfig::load(&config.identity, &http)
        .await
        .expect("failed to load identity configuration");

    let users = PgUserDirectory::new(db_pool.clone());
    let flow = AuthFlow::new(
        Arc::new(identity),
        KeyCache::new(http),
        Arc::new(users.clone()),
        Arc::new(session_repo.clone()),
    )
    .expect("incomplete identity configuration");

    let app_state = Arc::new(AppState::new(flow, users, session_repo, config.session));
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .expect("server error");
}
