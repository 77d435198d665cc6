use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::client_ip;
use crate::error::AppError;
use crate::recovery::coordinator::validate_email;
use crate::recovery::Verification;
use crate::state::SharedState;

pub const FORGOT_RESPONSE: &str = "If that email is registered, a reset link has been sent.";

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyParams {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn forgot(
    State(state): State<SharedState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = validate_email(&req.email)?;

    // Always the same 200 so responses don't reveal whether the email exists
    let response = Json(MessageResponse {
        message: FORGOT_RESPONSE.to_string(),
    });

    if state.issuance_limiter.check(email.clone()).is_err() {
        tracing::warn!("Password reset requests throttled for one address");
        return Ok(response);
    }

    // Issue in the background so timing is independent of the account lookup
    let coordinator = state.recovery.clone();
    state.background.spawn(async move {
        if let Err(e) = coordinator.request_recovery(&email).await {
            tracing::error!("Password reset issuance failed: {e}");
        }
    });

    Ok(response)
}

pub async fn verify(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<VerifyParams>,
) -> Result<Json<Verification>, AppError> {
    let token = params
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("token query parameter is required".to_string()))?;

    check_attempts(&state, &headers, addr)?;

    let verification = state.recovery.verify_token(&token).await?;
    Ok(Json(verification))
}

pub async fn reset(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    check_attempts(&state, &headers, addr)?;

    state
        .recovery
        .execute_reset(&req.token, &req.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

fn check_attempts(
    state: &SharedState,
    headers: &HeaderMap,
    addr: SocketAddr,
) -> Result<(), AppError> {
    let ip = client_ip::resolve(headers, addr.ip(), &state.config.trusted_proxies);
    state.attempt_limiter.check(ip).map_err(|retry_after| {
        AppError::RateLimited(format!(
            "Too many attempts. Please try again in {retry_after} seconds."
        ))
    })
}
