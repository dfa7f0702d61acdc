pub mod config;
mod error;
pub mod helpers;
mod routes;
pub mod session;
mod validation;
pub mod view;
pub mod workflow;

pub use error::{AppError, SEAT_OCCUPIED_MESSAGE};

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::session::SessionStore;

pub struct AppState {
    pub db: arcade_db::Database,
    pub sessions: SessionStore,
    /// Lowercased; empty means every signed-in user is an admin
    pub admin_emails: Vec<String>,
}

impl AppState {
    pub fn new(db: arcade_db::Database, config: &Config) -> Self {
        let sessions = SessionStore::new(
            db.clone(),
            config.federation_key.as_deref(),
            config.session_ttl,
        );
        Self {
            db,
            sessions,
            admin_emails: config.admin_emails.clone(),
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.is_empty() || self.admin_emails.iter().any(|admin| admin == email)
    }
}

/// Milliseconds between replenished requests for a per-minute quota.
fn auth_replenish_ms(per_min: u64) -> u64 {
    (60_000 / per_min.max(1)).max(1)
}

/// Milliseconds between replenished requests for a per-second quota.
fn general_replenish_ms(per_sec: u64) -> u64 {
    (1000 / per_sec.max(1)).max(1)
}

/// Create the application router with the given database and configuration
pub fn create_app(db: arcade_db::Database, config: &Config) -> Router {
    create_app_with_state(Arc::new(AppState::new(db, config)), config)
}

/// Same as `create_app` but with a state the caller keeps a handle to.
pub fn create_app_with_state(state: Arc<AppState>, config: &Config) -> Router {
    // Sign-in, registration and check-in
    let mut auth_routes = Router::new()
        .route("/auth/register", post(routes::register))
        .route("/auth/login", post(routes::login))
        .route("/auth/federated", post(routes::federated))
        .route("/checkin", post(routes::checkin));

    let mut general_routes = Router::new()
        .route("/auth/logout", post(routes::logout))
        .route("/session", get(routes::session_info))
        .route("/session/events", get(routes::session_events))
        .route("/seat/change", post(routes::change_seat))
        .route(
            "/arcades",
            get(routes::list_arcades).post(routes::upsert_arcade),
        )
        .route(
            "/arcades/{id}",
            get(routes::get_arcade)
                .put(routes::rename_arcade)
                .delete(routes::delete_arcade),
        )
        .route("/arcades/{id}/seats", get(routes::list_seats))
        .route(
            "/arcades/{id}/seats/{color}/vacate",
            post(routes::vacate_seat),
        )
        .route("/users/{uid}/events", get(routes::user_login_events))
        .route("/views/entry", get(routes::entry_view))
        .route("/views/loggedin", get(routes::loggedin_view))
        .route("/views/admin", get(routes::admin_view));

    if config.rate_limit_enabled {
        // Strict limit for credential checks
        let auth_governor = GovernorConfigBuilder::default()
            .per_millisecond(auth_replenish_ms(config.rate_limit_auth_per_min))
            .burst_size(config.rate_limit_auth_burst.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("auth rate limit config is valid");

        let general_governor = GovernorConfigBuilder::default()
            .per_millisecond(general_replenish_ms(config.rate_limit_general_per_sec))
            .burst_size(config.rate_limit_general_burst.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("general rate limit config is valid");

        auth_routes = auth_routes.layer(GovernorLayer::new(auth_governor));
        general_routes = general_routes.layer(GovernorLayer::new(general_governor));
    }

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(auth_routes)
        .merge(general_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.request_body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
