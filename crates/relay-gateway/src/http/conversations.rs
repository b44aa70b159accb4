use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use relay_conversations::{GroupSettingsPatch, GroupSpec};
use relay_core::types::ConversationKind;
use relay_core::CoreError;
use relay_messages::MessageDraft;
use relay_search::SearchRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::{require_user, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub since: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub n: Option<usize>,
}

/// GET /conversations and /conversations?type=
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let conversations = match query.kind.as_deref() {
        None => state.conversations.list_for_user(&user.id)?,
        Some(raw) => {
            let kind: ConversationKind = raw
                .parse()
                .map_err(|e: String| ApiError::from(CoreError::Validation(e)))?;
            state.conversations.list_for_user_by_kind(&user.id, kind)?
        }
    };
    Ok(Json(json!({ "conversations": conversations })))
}

/// POST /conversations/direct/{other_user_id} — idempotent.
pub async fn create_direct(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(other_user_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let conversation = state.conversations.create_direct(&user.id, &other_user_id)?;
    Ok(Json(json!({ "conversation": conversation })))
}

/// POST /conversations/group
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(spec): Json<GroupSpec>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = require_user(&state, &headers)?;
    let conversation = state.conversations.create_group(&user.id, &spec)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "conversation": conversation })),
    ))
}

/// PATCH /conversations/{id}
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<GroupSettingsPatch>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let conversation = state
        .conversations
        .update_group_settings(&id, &user.id, &patch)?;
    Ok(Json(json!({ "conversation": conversation })))
}

/// DELETE /conversations/{id} — cascade: messages, participants, row.
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let messages = state.messages.clone();
    state.conversations.delete_cascade(&id, &user.id, |cid| {
        messages
            .delete_conversation_messages(cid)
            .map_err(|e| e.to_string())
    })?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /conversations/{id}/participants/{user_id}
pub async fn add_participant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let actor = require_user(&state, &headers)?;
    state.conversations.add_user(&id, &actor.id, &user_id)?;
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /conversations/{id}/participants/{user_id}
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let actor = require_user(&state, &headers)?;
    state.conversations.remove_user(&id, &actor.id, &user_id)?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /conversations/{id}/messages?since=
pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    if !state.conversations.has_access(&user.id, &id)? {
        return Err(CoreError::Authorization("no access to this conversation".into()).into());
    }
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let messages = state
        .messages
        .list_conversation(&id, query.since.as_deref(), limit)?;
    Ok(Json(json!({ "messages": messages })))
}

/// POST /conversations/{id}/messages — the REST producer. Enqueues into
/// the same pipeline as the realtime gateway and waits on a reply slot so
/// the response can carry the assigned id; synchronous processing happens
/// only when the queue is full.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = require_user(&state, &headers)?;
    if request.content.trim().is_empty() {
        return Err(CoreError::Validation("message content must not be empty".into()).into());
    }
    if !state.conversations.has_access(&user.id, &id)? {
        return Err(CoreError::Authorization("no access to this conversation".into()).into());
    }

    let mut draft = MessageDraft::text(&id, &user.id, &user.display_name, request.content.trim());
    if let Some(msg_type) = request.msg_type {
        draft.msg_type = msg_type;
    }
    let message = state.pipeline.submit_and_wait(draft).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

/// POST /conversations/{id}/read — conversation-wide read sweep.
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let updated = state.receipts.mark_conversation_read(&id, &user.id)?;
    Ok(Json(json!({ "updated": updated })))
}

/// GET /conversations/unread — unread count per conversation.
pub async fn unread(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for conversation in state.conversations.list_for_user(&user.id)? {
        let last_read = state.conversations.last_read_at(&conversation.id, &user.id)?;
        let count =
            state
                .messages
                .count_since(&conversation.id, &user.id, last_read.as_deref())?;
        if count > 0 {
            counts.insert(conversation.id, count);
        }
    }
    Ok(Json(json!({ "unread": counts })))
}

/// GET /conversations/{id}/search?q=
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(request): Query<SearchRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let page = state.search.search(&id, &user.id, &request)?;
    Ok(Json(json!({ "results": page })))
}

/// GET /messages/{id}/context?n=
pub async fn context(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> ApiResult<Json<Value>> {
    let user = require_user(&state, &headers)?;
    let n = query.n.unwrap_or(21).clamp(1, 100);
    let window = state.search.context(&id, &user.id, n)?;
    Ok(Json(json!({ "messages": window })))
}
