use axum::{
    extract::{ws::Message, ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::config::MAX_PAYLOAD_BYTES;
use relay_protocol::frames::{to_wire, ErrorFrame};
use relay_users::User;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::http::error::bearer_token;
use crate::ws::dispatch;

/// Outbound frames queued per connection before a slow socket blocks the
/// fanout loop.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws — authenticates the handshake, then upgrades.
///
/// The bearer token comes from the `token` query parameter or the
/// Authorization header; a missing, invalid, expired, or revoked token
/// rejects the handshake before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(token) = query.token.or_else(|| bearer_token(&headers)) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user = match state.auth.user_from_token(&token) {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "ws handshake rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, user))
}

/// Per-connection task — lives for the entire session lifetime.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, user: User) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user_id = %user.id, "ws connection open");

    let (mut tx, mut rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    if let Err(e) = state.connections.register(&user.id, &conn_id, out_tx) {
        warn!(error = %e, "session binding write failed, continuing");
    }

    let idle = Duration::from_secs(state.config.realtime.idle_timeout_secs);
    let mut idle_timer = Box::pin(tokio::time::sleep(idle));

    loop {
        tokio::select! {
            // client sent us something
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        idle_timer.as_mut().reset(tokio::time::Instant::now() + idle);
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text_ref.len(), "payload too large, dropping connection");
                            break;
                        }
                        if let Some(response) = dispatch::handle_frame(&state, &user, text_ref).await {
                            if tx.send(Message::Text(response.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }

            // fanout payload for this connection
            outbound = out_rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // no traffic (heartbeats included) within the idle window
            _ = &mut idle_timer => {
                info!(conn_id, "idle timeout, closing connection");
                let goodbye = to_wire(&ErrorFrame::new("idle timeout"));
                let _ = tx.send(Message::Text(goodbye.into())).await;
                break;
            }
        }
    }

    if let Err(e) = state.connections.unregister(&conn_id) {
        warn!(error = %e, "session binding cleanup failed");
    }
    // flip the relational flag only when this was the user's last live
    // connection on this instance
    if !state.connections.is_online(&user.id).unwrap_or(true) {
        if let Err(e) = state.users.set_online(&user.id, false) {
            warn!(error = %e, "offline flag update failed");
        }
    }
    info!(conn_id, "ws connection closed");
}
