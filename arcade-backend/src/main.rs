use anyhow::Context;
use arcade_backend::session::SessionEvent;
use arcade_backend::{AppState, config::Config, create_app_with_state};
use arcade_db::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting arcade check-in server...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s, session_ttl={}s, admins={}, federated_sign_in={}",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.session_ttl.as_secs(),
        config.admin_emails.len(),
        config.federation_key.is_some()
    );
    if config.rate_limit_enabled {
        tracing::info!(
            "Rate limits: auth={}/min (burst {}), general={}/sec (burst {})",
            config.rate_limit_auth_per_min,
            config.rate_limit_auth_burst,
            config.rate_limit_general_per_sec,
            config.rate_limit_general_burst
        );
    } else {
        tracing::warn!("Rate limiting disabled");
    }

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("opening database at {}", config.database_path))?;
    let state = Arc::new(AppState::new(db, &config));

    // Sign-in activity log
    let mut events = state.sessions.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SignedIn { uid }) => tracing::info!(%uid, "user signed in"),
                Ok(SessionEvent::SignedOut { uid }) => tracing::info!(%uid, "user signed out"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session event log lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Expired session cleanup
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let ended = sweeper.sessions.expire_sessions().await;
            if ended > 0 {
                tracing::info!(ended, "expired sessions swept");
            }
        }
    });

    let app = create_app_with_state(state, &config);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
