//! REST mutations on existing messages. Each one updates the store, then
//! submits an event so the affected room's live sessions see the change.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::chat::events::{DeleteEvent, Event, MessageUpdateEvent};
use crate::db::models::{Message, NewMessage, StarredMessage};
use crate::db::{run_blocking, StoreError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub to_room_id: String,
}

/// Map a store failure to a status, logging anything but a missing message.
fn store_failure<'a>(
    action: &'static str,
    message_id: &'a str,
) -> impl FnOnce(StoreError) -> StatusCode + 'a {
    move |e| {
        if !matches!(e, StoreError::NotFound) {
            tracing::warn!(message_id = %message_id, error = %e, "Failed to {}", action);
        }
        StatusCode::from(e)
    }
}

async fn set_pinned(
    state: &AppState,
    message_id: String,
    pinned: bool,
) -> Result<Json<Message>, StatusCode> {
    let store = state.messages.clone();
    let id = message_id.clone();
    let message = run_blocking(move || {
        store.set_pinned(&id, pinned)?;
        store.find_by_id(&id)
    })
    .await
    .map_err(store_failure("pin message", &message_id))?;

    let update = MessageUpdateEvent::new(message.clone());
    let event = if pinned {
        Event::Pin(update)
    } else {
        Event::Unpin(update)
    };
    state.hub.submit(event).await;

    Ok(Json(message))
}

async fn set_starred(
    state: &AppState,
    user_id: String,
    message_id: String,
    starred: bool,
) -> Result<Json<Message>, StatusCode> {
    let store = state.messages.clone();
    let id = message_id.clone();
    let message = run_blocking(move || {
        store.set_starred(&id, &user_id, starred)?;
        store.find_by_id(&id)
    })
    .await
    .map_err(store_failure("star message", &message_id))?;

    let update = MessageUpdateEvent::new(message.clone());
    let event = if starred {
        Event::Star(update)
    } else {
        Event::Unstar(update)
    };
    state.hub.submit(event).await;

    Ok(Json(message))
}

/// POST /messages/{id}/pin
pub async fn pin_message(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Message>, StatusCode> {
    set_pinned(&state, message_id, true).await
}

/// POST /messages/{id}/unpin
pub async fn unpin_message(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Message>, StatusCode> {
    set_pinned(&state, message_id, false).await
}

/// POST /messages/{id}/star: Star for the caller.
pub async fn star_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Message>, StatusCode> {
    set_starred(&state, user_id, message_id, true).await
}

/// POST /messages/{id}/unstar
pub async fn unstar_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Message>, StatusCode> {
    set_starred(&state, user_id, message_id, false).await
}

/// DELETE /messages/{id}: Hard delete.
pub async fn delete_message(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(message_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let store = state.messages.clone();
    let id = message_id.clone();
    let room_id = run_blocking(move || {
        let message = store.find_by_id(&id)?;
        store.delete(&id)?;
        Ok(message.room_id)
    })
    .await
    .map_err(store_failure("delete message", &message_id))?;

    state
        .hub
        .submit(Event::Delete(DeleteEvent {
            room_id,
            message_id,
        }))
        .await;

    Ok(StatusCode::OK)
}

/// POST /messages/{id}/forward: Copy a message into another room.
/// The event goes to the destination room.
pub async fn forward_message(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<ForwardRequest>,
) -> Result<Json<Message>, StatusCode> {
    let to_room_id = body.to_room_id.trim().to_string();
    if to_room_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let store = state.messages.clone();
    let id = message_id.clone();
    let forwarded = run_blocking(move || {
        let original = store.find_by_id(&id)?;
        let new_id = store.insert(&NewMessage {
            room_id: to_room_id,
            sender_id: original.sender_id,
            content: original.content,
            media_url: original.media_url,
            reply_to: None,
            timestamp: Utc::now(),
        })?;
        store.find_by_id(&new_id)
    })
    .await
    .map_err(store_failure("forward message", &message_id))?;

    state
        .hub
        .submit(Event::Forward(MessageUpdateEvent::new(forwarded.clone())))
        .await;

    Ok(Json(forwarded))
}

/// GET /messages/starred: The caller's starred messages.
pub async fn get_starred_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<StarredMessage>>, StatusCode> {
    let store = state.messages.clone();
    let starred = run_blocking(move || store.starred_by(&user_id)).await?;
    Ok(Json(starred))
}
