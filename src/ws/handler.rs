use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::auth::middleware::AuthIdentity;
use crate::auth::Identity;
use crate::db::run_blocking;
use crate::state::AppState;
use crate::ws::actor;

/// GET /ws?token=JWT (or `Authorization: Bearer`)
/// WebSocket upgrade endpoint. The AuthIdentity extractor runs first, so a
/// missing or rejected token answers 401 and the connection is never upgraded.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::info!(user_id = %identity.user_id, "WebSocket connection authenticated");
    record_user(&state, &identity).await;

    let user_id = identity.user_id;
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
}

/// Keep the user's display name current for reply snapshots. Failures are
/// logged and the session still opens.
async fn record_user(state: &AppState, identity: &Identity) {
    let rooms = state.rooms.clone();
    let Identity {
        user_id,
        display_name,
    } = identity.clone();
    let id = user_id.clone();
    if let Err(e) = run_blocking(move || rooms.upsert_user(&id, display_name.as_deref())).await {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to record user");
    }
}
