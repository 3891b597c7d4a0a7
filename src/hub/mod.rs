//! In-process event hub: who is connected, who is subscribed where, and the
//! single dispatcher task that fans events out to room subscribers.
//!
//! The registry and the membership table share one mutex. The dispatcher
//! takes the same lock while it snapshots a room and enqueues an event, so a
//! join or leave can never interleave with a fan-out in progress. Delivery to
//! a session is a non-blocking `try_send` into its bounded outbound queue.

pub mod dispatcher;
pub mod membership;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::chat::events::{Event, PresenceEvent};
use crate::chat::presence::PresenceStatus;
use crate::db::models::RoomId;

pub use dispatcher::Dispatcher;
pub use membership::RoomMembership;
pub use registry::ConnectionRegistry;

pub type SessionId = u64;

/// A join from a session that is closing or was replaced by a newer login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session is no longer live")]
pub struct SessionGone;

/// What the dispatcher does when a session's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the event for that session only.
    #[default]
    Drop,
    /// Close the slow session.
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub event_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            outbound_queue_capacity: 64,
            overflow_policy: OverflowPolicy::Drop,
        }
    }
}

/// Why the server is closing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The same user opened a newer session.
    Replaced,
    /// The outbound queue overflowed under [`OverflowPolicy::Close`].
    SlowConsumer,
    /// No pong within the keepalive window.
    KeepaliveTimeout,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Replaced => 4000,
            CloseReason::SlowConsumer => 4008,
            CloseReason::KeepaliveTimeout => 1001,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::Replaced => "Replaced by a newer session",
            CloseReason::SlowConsumer => "Outbound queue overflow",
            CloseReason::KeepaliveTimeout => "Pong timeout",
        }
    }
}

/// Cloneable reference to one live session, as held by the registry and
/// the membership table.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: String,
    outbound: mpsc::Sender<Arc<Event>>,
    shutdown: Arc<watch::Sender<Option<CloseReason>>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Ask the session's loops to stop. The first reason wins.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    fn try_deliver(
        &self,
        event: Arc<Event>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<Event>>> {
        self.outbound.try_send(event)
    }
}

/// Receiving ends handed to the connection that owns a session.
pub struct SessionChannels {
    pub events: mpsc::Receiver<Arc<Event>>,
    pub shutdown: watch::Receiver<Option<CloseReason>>,
}

#[derive(Debug, Default)]
pub(crate) struct HubState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) membership: RoomMembership,
}

pub(crate) struct Shared {
    state: Mutex<HubState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, HubState> {
        // The guarded maps stay consistent across a panicking holder.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the hub services. Cheap to clone; passed to the session
/// constructor and to REST handlers through `AppState`.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    events: mpsc::Sender<Event>,
    next_session_id: Arc<AtomicU64>,
    settings: HubSettings,
}

impl Hub {
    /// Build the hub and its dispatcher. The dispatcher must be run (usually
    /// on its own task) for submitted events to be delivered.
    pub fn new(settings: HubSettings) -> (Self, Dispatcher) {
        let shared = Arc::new(Shared {
            state: Mutex::new(HubState::default()),
        });
        let (tx, rx) = mpsc::channel(settings.event_queue_capacity.max(1));
        let hub = Self {
            shared: shared.clone(),
            events: tx,
            next_session_id: Arc::new(AtomicU64::new(1)),
            settings,
        };
        let dispatcher = Dispatcher::new(shared, rx, settings.overflow_policy);
        (hub, dispatcher)
    }

    /// Build the hub and spawn its dispatcher on the current runtime.
    pub fn spawn(settings: HubSettings) -> Self {
        let (hub, dispatcher) = Self::new(settings);
        tokio::spawn(dispatcher.run());
        hub
    }

    /// Create and register a session for `user_id`. Any previous session of
    /// the same user is removed from its room and told to close.
    pub fn open_session(&self, user_id: &str) -> (SessionHandle, SessionChannels) {
        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.settings.outbound_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let handle = SessionHandle {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.to_string(),
            outbound: outbound_tx,
            shutdown: Arc::new(shutdown_tx),
        };

        let evicted = {
            let mut state = self.shared.lock();
            let evicted = state.registry.register(handle.clone());
            if let Some(old) = &evicted {
                state.membership.leave_current(old.id());
            }
            evicted
        };

        if let Some(old) = evicted {
            tracing::info!(
                user_id = %user_id,
                old_session = old.id(),
                new_session = handle.id(),
                "Evicting previous session"
            );
            old.close(CloseReason::Replaced);
        }

        tracing::debug!(user_id = %user_id, session_id = handle.id(), "Session registered");

        let channels = SessionChannels {
            events: outbound_rx,
            shutdown: shutdown_rx,
        };
        (handle, channels)
    }

    /// Subscribe `session` to `room_id`, moving it out of its previous room,
    /// and return the room it left.
    /// Emits `offline` presence to the room left and `online` to the room joined.
    pub async fn join(
        &self,
        session: &SessionHandle,
        room_id: &str,
    ) -> Result<Option<RoomId>, SessionGone> {
        let (previous, already_there) = {
            let mut state = self.shared.lock();
            let registered = state
                .registry
                .lookup(session.user_id())
                .is_some_and(|current| current.id() == session.id());
            if !registered || session.is_closing() {
                return Err(SessionGone);
            }
            let already_there =
                state.membership.room_of(session.id()).map(String::as_str) == Some(room_id);
            (state.membership.join(room_id, session.clone()), already_there)
        };

        if let Some(previous) = &previous {
            self.submit(presence(previous, session.user_id(), PresenceStatus::Offline))
                .await;
        }
        if !already_there {
            self.submit(presence(room_id, session.user_id(), PresenceStatus::Online))
                .await;
        }
        Ok(previous)
    }

    /// Unsubscribe `session` from `room_id`. No-op if it is not subscribed there.
    pub async fn leave(&self, session: &SessionHandle, room_id: &str) -> bool {
        let left = self.shared.lock().membership.leave(room_id, session.id());
        if left {
            self.submit(presence(room_id, session.user_id(), PresenceStatus::Offline))
                .await;
        }
        left
    }

    /// Tear down a session: unregister it (if it still owns its user's slot)
    /// and remove it from its room, in one critical section.
    pub async fn close_session(&self, session: &SessionHandle) {
        let (left, still_online) = {
            let mut state = self.shared.lock();
            state
                .registry
                .unregister(session.user_id(), session.id());
            let left = state.membership.leave_current(session.id());
            (left, state.registry.lookup(session.user_id()).is_some())
        };

        tracing::debug!(
            user_id = %session.user_id(),
            session_id = session.id(),
            "Session unregistered"
        );

        if let Some(room_id) = left {
            if !still_online {
                self.submit(presence(&room_id, session.user_id(), PresenceStatus::Offline))
                    .await;
            }
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<SessionHandle> {
        self.shared.lock().registry.lookup(user_id).cloned()
    }

    pub fn members_of(&self, room_id: &str) -> Vec<SessionHandle> {
        self.shared.lock().membership.members_of(room_id)
    }

    pub fn current_room(&self, session: &SessionHandle) -> Option<RoomId> {
        self.shared.lock().membership.room_of(session.id()).cloned()
    }

    /// Queue an event for fan-out. Waits only for room in the event queue.
    pub async fn submit(&self, event: Event) {
        let kind = event.kind();
        if self.events.send(event).await.is_err() {
            tracing::warn!(kind = kind, "Dispatcher stopped, event discarded");
        }
    }
}

fn presence(room_id: &str, user_id: &str, status: PresenceStatus) -> Event {
    Event::Presence(PresenceEvent {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        status,
    })
}

/// Standalone handle for unit tests that only exercise the maps.
#[cfg(test)]
pub(crate) fn test_session(
    id: SessionId,
    user_id: &str,
) -> (SessionHandle, mpsc::Receiver<Arc<Event>>) {
    let (tx, rx) = mpsc::channel(8);
    let (shutdown, _) = watch::channel(None);
    let handle = SessionHandle {
        id,
        user_id: user_id.to_string(),
        outbound: tx,
        shutdown: Arc::new(shutdown),
    };
    (handle, rx)
}
