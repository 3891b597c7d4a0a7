use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenVerifier;
use crate::db::{MessageStore, RoomDirectory};
use crate::hub::Hub;

/// WebSocket keepalive timing.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveSettings {
    /// Server sends a ping this often.
    pub ping_interval: Duration,
    /// Session closes if no pong arrives within this window after a ping.
    pub pong_timeout: Duration,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
/// Every service is constructed once at startup and injected here.
#[derive(Clone)]
pub struct AppState {
    /// Message persistence and enrichment
    pub messages: Arc<dyn MessageStore>,
    /// Persistent rooms and their authorized members
    pub rooms: Arc<dyn RoomDirectory>,
    /// Bearer credential verification
    pub verifier: Arc<dyn TokenVerifier>,
    /// Session registry, room subscriptions and event fan-out
    pub hub: Hub,
    pub keepalive: KeepaliveSettings,
}
