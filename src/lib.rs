pub mod auth;
pub mod client_ip;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod recovery;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use sqlx::PgPool;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::email::SystemMailer;
use crate::rate_limit::{issuance_limiter, token_attempt_limiter};
use crate::recovery::postgres::{OutboxGateway, PgDirectory, PgTokenStore};
use crate::recovery::{RecoveryPolicy, ResetCoordinator, SystemClock};
use crate::state::{AppState, BackgroundTasks, SharedState};

/// Wire the Postgres-backed recovery flow and build the router.
pub fn build_app(pool: PgPool, config: Config) -> (Router, SharedState) {
    let coordinator = ResetCoordinator::new(
        Arc::new(PgTokenStore::new(pool.clone())),
        Arc::new(PgDirectory::new(pool.clone())),
        Arc::new(OutboxGateway::new(
            pool,
            &config.base_url,
            config.recovery.token_ttl,
        )),
        Arc::new(SystemClock),
        RecoveryPolicy::from(&config.recovery),
    );

    let state = build_state(config, coordinator);
    (router(state.clone()), state)
}

pub fn build_state(config: Config, coordinator: ResetCoordinator) -> SharedState {
    Arc::new(AppState {
        config,
        recovery: Arc::new(coordinator),
        issuance_limiter: issuance_limiter(),
        attempt_limiter: token_attempt_limiter(),
        background: BackgroundTasks::new(),
    })
}

pub fn router(state: SharedState) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        .merge(routes::recovery_routes())
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state)
}

/// Build the system mailer, or `None` when SMTP is unset or unusable.
pub fn system_mailer(config: &Config) -> Option<Arc<SystemMailer>> {
    config
        .smtp
        .as_ref()
        .and_then(|smtp| match SystemMailer::new(smtp) {
            Ok(mailer) => {
                tracing::info!("System SMTP configured");
                Some(Arc::new(mailer))
            }
            Err(e) => {
                tracing::warn!("System SMTP not available: {e}");
                None
            }
        })
}

async fn health() -> &'static str {
    "ok"
}
