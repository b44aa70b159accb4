use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_users::User;
use serde_json::json;
use tracing::error;

use crate::app::AppState;

/// Boundary error: a status code, a stable machine code, and a message
/// that is safe to show a client. Internal detail stays in the log.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_FAILED", message)
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve the bearer principal for a request. Runs before any handler
/// logic on every protected endpoint.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<User> {
    let token =
        bearer_token(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    state
        .auth
        .user_from_token(&token)
        .map_err(ApiError::from)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

impl From<relay_core::CoreError> for ApiError {
    fn from(e: relay_core::CoreError) -> Self {
        use relay_core::CoreError::*;
        let status = match &e {
            AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Authorization(_) => StatusCode::FORBIDDEN,
            Validation(_) => StatusCode::BAD_REQUEST,
            NotFound { .. } => StatusCode::NOT_FOUND,
            Conflict(_) => StatusCode::CONFLICT,
            RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Transient(_) | Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Config(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.code(), e.to_string())
    }
}

impl From<relay_auth::AuthError> for ApiError {
    fn from(e: relay_auth::AuthError) -> Self {
        use relay_auth::AuthError::*;
        match e {
            InvalidCredentials | InvalidToken | TokenRevoked => {
                Self::unauthorized(e.to_string())
            }
            InvalidResetToken => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_RESET_TOKEN",
                e.to_string(),
            ),
            UsernameTaken | EmailTaken => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", e.to_string())
            }
            Validation(msg) => Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            Users(e) => {
                error!(error = %e, "user store failure");
                Self::internal()
            }
            Tokens(e) => {
                error!(error = %e, "token service failure");
                Self::internal()
            }
            Hashing(e) => {
                error!(error = %e, "hashing failure");
                Self::internal()
            }
        }
    }
}

impl From<relay_users::UserError> for ApiError {
    fn from(e: relay_users::UserError) -> Self {
        use relay_users::UserError::*;
        match e {
            NotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("user not found: {id}"),
            ),
            UsernameTaken | EmailTaken => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", e.to_string())
            }
            Database(e) => {
                error!(error = %e, "user store failure");
                Self::internal()
            }
        }
    }
}

impl From<relay_conversations::ConversationError> for ApiError {
    fn from(e: relay_conversations::ConversationError) -> Self {
        use relay_conversations::ConversationError::*;
        match e {
            NotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("conversation not found: {id}"),
            ),
            ParticipantNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("participant not found: {id}"),
            ),
            NotAuthorized(msg) => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            OperationNotAllowed(msg) | Validation(msg) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg)
            }
            CapacityExceeded { active, cap } => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("participant cap exceeded: {active} active, cap {cap}"),
            ),
            PurgeFailed(e) => {
                error!(error = %e, "message purge failure");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "TRANSIENT",
                    "message store unavailable, retry later",
                )
            }
            Database(e) => {
                error!(error = %e, "conversation store failure");
                Self::internal()
            }
            Users(e) => Self::from(e),
        }
    }
}

impl From<relay_messages::MessageError> for ApiError {
    fn from(e: relay_messages::MessageError) -> Self {
        use relay_messages::MessageError::*;
        match e {
            NotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("message not found: {id}"),
            ),
            Database(e) => {
                error!(error = %e, "message store failure");
                Self::internal()
            }
            Encoding(e) => {
                error!(error = %e, "message encoding failure");
                Self::internal()
            }
        }
    }
}

impl From<relay_receipts::ReceiptError> for ApiError {
    fn from(e: relay_receipts::ReceiptError) -> Self {
        use relay_receipts::ReceiptError::*;
        match e {
            Messages(e) => Self::from(e),
            Conversations(e) => Self::from(e),
        }
    }
}

impl From<relay_search::SearchError> for ApiError {
    fn from(e: relay_search::SearchError) -> Self {
        use relay_search::SearchError::*;
        match e {
            Messages(e) => Self::from(e),
            Conversations(e) => Self::from(e),
        }
    }
}

impl From<relay_pipeline::PipelineError> for ApiError {
    fn from(e: relay_pipeline::PipelineError) -> Self {
        use relay_pipeline::PipelineError::*;
        match e {
            Overloaded => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "OVERLOADED",
                "server overloaded, retry with backoff",
            ),
            Store(e) => Self::from(e),
        }
    }
}
