use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use relay_auth::RegisterRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::{bearer_token, require_user, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let session = state.auth.register(&request)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": session.user, "token": session.token })),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let session = state.auth.login(&request.email, &request.password)?;
    Ok(Json(json!({ "user": session.user, "token": session.token })))
}

/// POST /auth/logout — revokes the presented bearer token. Succeeds even
/// when the token is garbage.
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Value> {
    if let Some(token) = bearer_token(&headers) {
        state.auth.logout(&token);
    }
    Json(json!({ "ok": true }))
}

/// GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    Ok(Json(json!({ "user": user })))
}

/// POST /auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    state
        .auth
        .change_password(&user.id, &request.current_password, &request.new_password)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /auth/forgot-password — always 200, whatever happened inside.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Json<Value> {
    state.auth.request_password_reset(&request.email).await;
    Json(json!({ "ok": true }))
}

/// POST /auth/reset-password — consumes the single-use token.
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    state
        .auth
        .reset_password(&request.token, &request.new_password)
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "ok": true })))
}
