use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::auth::middleware::Verifier;
use crate::chat::{actions, messages, presence, rooms};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the token verifier into request extensions so the AuthUser
/// extractor can find it.
async fn inject_verifier(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(Verifier(state.verifier.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Room routes (AuthUser extractor enforces the bearer token)
    let room_routes = Router::new()
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/{id}/messages", get(messages::get_room_messages))
        .route(
            "/rooms/{id}/messages/mark-read",
            post(messages::mark_room_read),
        )
        .route("/users/{id}/rooms", get(rooms::list_user_rooms))
        .route("/users/{id}/presence", get(presence::get_presence));

    // Message mutation routes; each one emits an event to the affected room
    let message_routes = Router::new()
        .route("/messages/starred", get(actions::get_starred_messages))
        .route("/messages/{id}", delete(actions::delete_message))
        .route("/messages/{id}/pin", post(actions::pin_message))
        .route("/messages/{id}/unpin", post(actions::unpin_message))
        .route("/messages/{id}/star", post(actions::star_message))
        .route("/messages/{id}/unstar", post(actions::unstar_message))
        .route("/messages/{id}/forward", post(actions::forward_message));

    // WebSocket route (token via ?token= or Authorization header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(room_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_verifier,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
