use axum::{
    routing::{get, patch, post},
    Router,
};
use relay_auth::AuthService;
use relay_conversations::ConversationManager;
use relay_core::config::RelayConfig;
use relay_messages::MessageStore;
use relay_pipeline::MessagePipeline;
use relay_presence::ConnectionManager;
use relay_receipts::ReceiptService;
use relay_search::SearchService;
use relay_tokens::TokenService;
use relay_users::UserStore;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RelayConfig,
    pub instance_id: String,
    pub users: Arc<UserStore>,
    pub conversations: Arc<ConversationManager>,
    pub messages: Arc<MessageStore>,
    pub receipts: Arc<ReceiptService>,
    pub search: Arc<SearchService>,
    pub auth: Arc<AuthService>,
    pub tokens: Arc<TokenService>,
    pub connections: Arc<ConnectionManager>,
    pub pipeline: Arc<MessagePipeline>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/auth/register", post(crate::http::auth::register))
        .route("/auth/login", post(crate::http::auth::login))
        .route("/auth/logout", post(crate::http::auth::logout))
        .route("/auth/me", get(crate::http::auth::me))
        .route("/auth/change-password", post(crate::http::auth::change_password))
        .route("/auth/forgot-password", post(crate::http::auth::forgot_password))
        .route("/auth/reset-password", post(crate::http::auth::reset_password))
        .route("/users/search", get(crate::http::users::search))
        .route("/users/me", patch(crate::http::users::update_profile))
        .route("/conversations", get(crate::http::conversations::list))
        .route("/conversations/unread", get(crate::http::conversations::unread))
        .route(
            "/conversations/direct/{other_user_id}",
            post(crate::http::conversations::create_direct),
        )
        .route("/conversations/group", post(crate::http::conversations::create_group))
        .route(
            "/conversations/{id}",
            patch(crate::http::conversations::update_settings)
                .delete(crate::http::conversations::delete_conversation),
        )
        .route(
            "/conversations/{id}/participants/{user_id}",
            post(crate::http::conversations::add_participant)
                .delete(crate::http::conversations::remove_participant),
        )
        .route(
            "/conversations/{id}/messages",
            get(crate::http::conversations::history).post(crate::http::conversations::send_message),
        )
        .route("/conversations/{id}/read", post(crate::http::conversations::mark_read))
        .route("/conversations/{id}/search", get(crate::http::conversations::search))
        .route(
            "/messages/{id}/context",
            get(crate::http::conversations::context),
        )
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
}

/// Allow exactly the configured origins; an empty list allows none.
fn cors_layer(config: &RelayConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .gateway
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
