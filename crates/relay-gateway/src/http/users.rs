use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::{require_user, ApiResult};

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// GET /users/search?q= — the picker for starting conversations.
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UserSearchQuery>,
) -> ApiResult<Json<Value>> {
    require_user(&state, &headers)?;
    let needle = query.q.trim();
    if needle.is_empty() {
        return Ok(Json(json!({ "users": [] })));
    }
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let users = state.users.search(needle, limit)?;
    Ok(Json(json!({ "users": users })))
}

/// PATCH /users/me — apply only the fields present.
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let updated = state.users.update_profile(
        &user.id,
        patch.display_name.as_deref(),
        patch.avatar_url.as_deref(),
    )?;
    Ok(Json(json!({ "user": updated })))
}
