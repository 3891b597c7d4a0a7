//! Presence: derived from the live session registry, announced to rooms as
//! sessions join, leave and disconnect.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::auth::middleware::AuthUser;
use crate::db::models::{RoomId, UserId};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

/// GET /users/{id}/presence: Whether the user has a live session, and the
/// room it is subscribed to.
pub async fn get_presence(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(user_id): Path<String>,
) -> Json<PresenceResponse> {
    let session = state.hub.lookup(&user_id);
    let room_id = session.as_ref().and_then(|s| state.hub.current_room(s));
    let status = if session.is_some() {
        PresenceStatus::Online
    } else {
        PresenceStatus::Offline
    };

    Json(PresenceResponse {
        user_id,
        status,
        room_id,
    })
}
