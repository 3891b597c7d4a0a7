use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{CloseReason, HubState, OverflowPolicy, Shared};
use crate::chat::events::Event;

/// Outcome of fanning one event out to a room.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanOut {
    pub delivered: usize,
    pub suppressed: usize,
    pub overflowed: usize,
}

/// The single consumer of the hub's event queue.
pub struct Dispatcher {
    shared: Arc<Shared>,
    events: mpsc::Receiver<Event>,
    overflow_policy: OverflowPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        events: mpsc::Receiver<Event>,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        Self {
            shared,
            events,
            overflow_policy,
        }
    }

    /// Consume events until every hub handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Event dispatcher started");
        while let Some(event) = self.events.recv().await {
            let event = Arc::new(event);
            let result = {
                let state = self.shared.lock();
                fan_out(&state, &event, self.overflow_policy)
            };
            tracing::trace!(
                kind = event.kind(),
                room_id = %event.room_id(),
                delivered = result.delivered,
                suppressed = result.suppressed,
                overflowed = result.overflowed,
                "Event dispatched"
            );
        }
        tracing::info!("Event dispatcher stopped");
    }
}

/// Enqueue `event` on every session subscribed to its room. Runs under the
/// hub lock and never waits on a consumer.
pub(crate) fn fan_out(state: &HubState, event: &Arc<Event>, policy: OverflowPolicy) -> FanOut {
    let mut result = FanOut::default();
    let skip_user = event.suppressed_for();

    for member in state.membership.members_of(event.room_id()) {
        if skip_user == Some(member.user_id()) {
            result.suppressed += 1;
            continue;
        }

        match member.try_deliver(event.clone()) {
            Ok(()) => result.delivered += 1,
            Err(TrySendError::Full(_)) => {
                result.overflowed += 1;
                match policy {
                    OverflowPolicy::Drop => {
                        tracing::warn!(
                            user_id = %member.user_id(),
                            session_id = member.id(),
                            kind = event.kind(),
                            "Outbound queue full, event dropped"
                        );
                    }
                    OverflowPolicy::Close => {
                        tracing::warn!(
                            user_id = %member.user_id(),
                            session_id = member.id(),
                            "Outbound queue full, closing session"
                        );
                        member.close(CloseReason::SlowConsumer);
                    }
                }
            }
            // Receiver gone: the session is already shutting down and will
            // remove itself.
            Err(TrySendError::Closed(_)) => {}
        }
    }
    result
}
