//! Message creation for the session loop, plus the REST history and
//! read-receipt endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::db::models::{Message, NewMessage};
use crate::db::{run_blocking, MessageStore, StoreError};
use crate::state::AppState;

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;
/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

/// Persist a new message, then read it back through the enrichment path so
/// the broadcast copy carries its reply snapshot.
pub async fn create_message(
    store: Arc<dyn MessageStore>,
    message: NewMessage,
) -> Result<Message, StoreError> {
    run_blocking(move || {
        let id = store.insert(&message)?;
        store.fetch_enriched(&id)
    })
    .await
}

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

// --- Handlers ---

/// GET /rooms/{id}/messages?before={message_id}&limit={n}
/// Paginated, enriched history, oldest first. Caller must be a room member.
pub async fn get_room_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let rooms = state.rooms.clone();
    let rid = room_id.clone();
    let is_member = run_blocking(move || rooms.is_member(&rid, &user_id)).await?;
    if !is_member {
        return Err(StatusCode::FORBIDDEN);
    }

    let store = state.messages.clone();
    let messages = run_blocking(move || {
        store.list_room_messages(&room_id, query.before.as_deref(), limit)
    })
    .await?;

    Ok(Json(messages))
}

/// POST /rooms/{id}/messages/mark-read
/// Add the caller to `readBy` of every message in the room.
pub async fn mark_room_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<String>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let store = state.messages.clone();
    let marked = run_blocking(move || store.mark_room_read(&room_id, &user_id))
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to mark room read");
            StatusCode::from(e)
        })?;

    Ok(Json(MarkReadResponse { marked }))
}
