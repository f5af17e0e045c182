//! Chat API endpoints
//!
//! - POST /api/v1/chats - Open a chat at a venue
//! - GET /api/v1/chats - List chats with filters
//! - GET /api/v1/chats/{id}/messages - List a chat's messages
//! - POST /api/v1/chats/{id}/accept - Accept a pending chat
//! - POST /api/v1/chats/{id}/reject - Reject a chat
//! - POST /api/v1/chats/{id}/message - Send a message
//! - DELETE /api/v1/chats/{id} - Delete a chat (owner or admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ActiveFilter, ChatFilter, ChatStatus, SortOrder};
use crate::services::CreateChatInput;

/// Query parameters for listing chats
#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    pub venue: Option<i64>,
    pub user: Option<i64>,
    /// "created", "accepted", "rejected", "exhausted" or "expired"
    pub status: Option<String>,
    /// "true" (default), "false" or "all"
    pub active: Option<String>,
    /// "desc" (default) or "asc"
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub no_cache: bool,
}

impl ListChatsQuery {
    fn into_filter(self) -> Result<ChatFilter, ApiError> {
        let status = match self.status.as_deref() {
            Some(s) => Some(
                s.parse::<ChatStatus>()
                    .map_err(|e| ApiError::validation_error(e.to_string()))?,
            ),
            None => None,
        };
        let active = match self.active.as_deref() {
            Some(s) => s
                .parse::<ActiveFilter>()
                .map_err(|e| ApiError::validation_error(e.to_string()))?,
            None => ActiveFilter::default(),
        };
        let sort = match self.sort.as_deref() {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|e| ApiError::validation_error(e.to_string()))?,
            None => SortOrder::default(),
        };
        Ok(ChatFilter {
            venue_id: self.venue,
            user_id: self.user,
            status,
            active,
            sort,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Request body for opening a chat
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub venue_id: i64,
    /// Admin only, defaults to the caller
    pub user_id: Option<i64>,
}

/// Request body for sending a message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

/// Response for a single chat
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: i64,
    pub venue_id: i64,
    pub user_id: i64,
    pub user_age: i64,
    pub status: String,
    pub active: bool,
    pub expires_at: String,
    pub created_at: String,
}

impl From<crate::models::Chat> for ChatResponse {
    fn from(c: crate::models::Chat) -> Self {
        Self {
            id: c.id,
            venue_id: c.venue_id,
            user_id: c.user_id,
            user_age: c.user_age,
            status: c.status.to_string(),
            active: c.active,
            expires_at: c.expires_at.to_rfc3339(),
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

/// Response for a single message
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: String,
}

impl From<crate::models::Message> for MessageResponse {
    fn from(m: crate::models::Message) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            body: m.body,
            created_at: m.created_at.to_rfc3339(),
        }
    }
}

/// Response for chat listings
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatResponse>,
    pub total: usize,
}

/// Response for message listings
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
    pub total: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_chat))
        .route("/", get(list_chats))
        .route("/{id}/messages", get(list_messages))
        .route("/{id}/accept", post(accept_chat))
        .route("/{id}/reject", post(reject_chat))
        .route("/{id}/message", post(send_message))
        .route("/{id}", delete(delete_chat))
}

/// POST /api/v1/chats - Open a chat
///
/// Replaces any previous chat owned by the same user and schedules
/// the expiry job for the new one.
async fn create_chat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .chat_service
        .create(
            &user,
            CreateChatInput {
                venue_id: body.venue_id,
                user_id: body.user_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ChatResponse::from(chat))))
}

/// GET /api/v1/chats - List chats
async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let no_cache = query.no_cache;
    let filter = query.into_filter()?;

    let chats = state.chat_service.list(&filter, no_cache).await?;
    let total = chats.len();

    Ok(Json(ChatListResponse {
        chats: chats.into_iter().map(ChatResponse::from).collect(),
        total,
    }))
}

/// GET /api/v1/chats/{id}/messages - Messages in send order
async fn list_messages(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let messages = state.chat_service.messages(&user, id).await?;
    let total = messages.len();

    Ok(Json(MessageListResponse {
        messages: messages.into_iter().map(MessageResponse::from).collect(),
        total,
    }))
}

/// POST /api/v1/chats/{id}/accept - Accept a pending chat
async fn accept_chat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = state.chat_service.accept(&user, id).await?;
    Ok(Json(chat.into()))
}

/// POST /api/v1/chats/{id}/reject - Reject a chat
async fn reject_chat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = state.chat_service.reject(&user, id).await?;
    Ok(Json(chat.into()))
}

/// POST /api/v1/chats/{id}/message - Send a message
async fn send_message(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.chat_service.send_message(&user, id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::from(message))))
}

/// DELETE /api/v1/chats/{id} - Delete a chat (owner or admin)
async fn delete_chat(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.chat_service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
