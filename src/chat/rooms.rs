//! REST endpoints for persistent rooms.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::db::models::{NewRoom, Room, RoomSummary};
use crate::db::run_blocking;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub is_group: bool,
}

/// POST /rooms: Create a room. The caller is always a member.
pub async fn create_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Json<Room>, StatusCode> {
    let mut members: BTreeSet<String> = body
        .members
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    members.insert(user_id.clone());

    let new_room = NewRoom {
        name: body.name.trim().to_string(),
        members,
        is_group: body.is_group,
    };

    let rooms = state.rooms.clone();
    let room = run_blocking(move || rooms.create_room(&new_room)).await?;

    tracing::info!(room_id = %room.id, created_by = %user_id, "Room created");
    Ok(Json(room))
}

/// GET /users/{id}/rooms: Rooms the user belongs to, with the latest
/// message and unread count. Callers may only list their own rooms.
pub async fn list_user_rooms(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<RoomSummary>>, StatusCode> {
    if caller != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let rooms = state.rooms.clone();
    let summaries = run_blocking(move || rooms.rooms_for_user(&user_id)).await?;
    Ok(Json(summaries))
}
