pub mod password_reset;

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::state::SharedState;

pub fn recovery_routes() -> Router<SharedState> {
    Router::new()
        .route("/password-reset/forgot", post(password_reset::forgot))
        .route("/password-reset/verify", get(password_reset::verify))
        .route("/password-reset/reset", post(password_reset::reset))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}
