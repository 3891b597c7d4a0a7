//! Inbound frame decoding and dispatch for one session.
//!
//! Frames are JSON text objects tagged by `type`. Anything that fails to
//! decode or validate is dropped and the connection keeps going; nothing is
//! ever sent back to the peer as an error.

use chrono::Utc;
use serde::Deserialize;

use crate::chat::events::{Event, MessageEvent, ReactionEvent, TypingEvent};
use crate::chat::messages::{self, MAX_CONTENT_LENGTH};
use crate::chat::reactions;
use crate::db::models::{MessageId, NewMessage, RoomId};
use crate::db::run_blocking;
use crate::hub::SessionHandle;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Message(MessageFrame),
    Typing(TypingFrame),
    Reaction(ReactionFrame),
    Join(JoinFrame),
    Leave(LeaveFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub room_id: RoomId,
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub client_side_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingFrame {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionFrame {
    pub room_id: RoomId,
    pub message_id: MessageId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinFrame {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveFrame {
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Message(_) => "message",
            ClientFrame::Typing(_) => "typing",
            ClientFrame::Reaction(_) => "reaction",
            ClientFrame::Join(_) => "join",
            ClientFrame::Leave(_) => "leave",
        }
    }

    /// Field checks that serde cannot express.
    fn is_valid(&self) -> bool {
        match self {
            ClientFrame::Message(f) => {
                let has_media = f.media_url.as_deref().is_some_and(|u| !u.trim().is_empty());
                !f.room_id.is_empty()
                    && (has_media || !f.content.trim().is_empty())
                    && f.content.chars().count() <= MAX_CONTENT_LENGTH
            }
            ClientFrame::Typing(f) => !f.room_id.is_empty(),
            ClientFrame::Reaction(f) => {
                !f.room_id.is_empty()
                    && !f.message_id.is_empty()
                    && reactions::normalize_emoji(&f.emoji).is_some()
            }
            ClientFrame::Join(f) => !f.room_id.is_empty(),
            ClientFrame::Leave(_) => true,
        }
    }
}

/// Decode and validate one text frame. `None` means drop it.
pub fn decode_frame(text: &str) -> Option<ClientFrame> {
    let frame: ClientFrame = serde_json::from_str(text).ok()?;
    frame.is_valid().then_some(frame)
}

/// Where a session is in its lifecycle. A connection only exists once the
/// handshake has authenticated it, so there is no pre-auth phase here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Authenticated,
    Subscribed(RoomId),
    Closed,
}

/// Per-connection view used by the frame handlers.
pub struct SessionContext {
    pub state: AppState,
    pub session: SessionHandle,
}

impl SessionContext {
    pub fn new(state: AppState, session: SessionHandle) -> Self {
        Self { state, session }
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    /// Read from the hub, since an eviction can change it underneath us.
    pub fn phase(&self) -> SessionPhase {
        if self.session.is_closing() {
            return SessionPhase::Closed;
        }
        match self.state.hub.current_room(&self.session) {
            Some(room_id) => SessionPhase::Subscribed(room_id),
            None => SessionPhase::Authenticated,
        }
    }
}

/// Handle one inbound text frame.
pub async fn handle_text_frame(ctx: &SessionContext, text: &str) {
    let Some(frame) = decode_frame(text) else {
        tracing::debug!(
            user_id = %ctx.user_id(),
            frame = %text.chars().take(100).collect::<String>(),
            "Dropping malformed frame"
        );
        return;
    };

    if ctx.phase() == SessionPhase::Closed {
        tracing::debug!(user_id = %ctx.user_id(), kind = frame.kind(), "Session closing, frame ignored");
        return;
    }

    match frame {
        ClientFrame::Message(f) => handle_message(ctx, f).await,
        ClientFrame::Typing(f) => handle_typing(ctx, f).await,
        ClientFrame::Reaction(f) => handle_reaction(ctx, f).await,
        ClientFrame::Join(f) => handle_join(ctx, f).await,
        ClientFrame::Leave(f) => handle_leave(ctx, f).await,
    }
}

async fn handle_message(ctx: &SessionContext, frame: MessageFrame) {
    let new_message = NewMessage {
        room_id: frame.room_id,
        sender_id: ctx.user_id().to_string(),
        content: frame.content,
        media_url: frame.media_url.filter(|u| !u.trim().is_empty()),
        reply_to: frame.reply_to.filter(|r| !r.is_empty()),
        timestamp: Utc::now(),
    };

    let message = match messages::create_message(ctx.state.messages.clone(), new_message).await {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(user_id = %ctx.user_id(), error = %e, "Failed to persist message");
            return;
        }
    };

    tracing::debug!(
        user_id = %ctx.user_id(),
        room_id = %message.room_id,
        message_id = %message.id,
        "Message stored"
    );

    ctx.state
        .hub
        .submit(Event::Message(MessageEvent::from_message(
            message,
            frame.client_side_id,
        )))
        .await;
}

async fn handle_typing(ctx: &SessionContext, frame: TypingFrame) {
    match ctx.phase() {
        SessionPhase::Subscribed(room_id) if room_id == frame.room_id => {
            ctx.state
                .hub
                .submit(Event::Typing(TypingEvent {
                    room_id,
                    user_id: ctx.user_id().to_string(),
                }))
                .await;
        }
        _ => {
            tracing::debug!(
                user_id = %ctx.user_id(),
                room_id = %frame.room_id,
                "Typing outside the current room, dropped"
            );
        }
    }
}

async fn handle_reaction(ctx: &SessionContext, frame: ReactionFrame) {
    let Some(emoji) = reactions::normalize_emoji(&frame.emoji).map(str::to_string) else {
        return;
    };

    let store = ctx.state.messages.clone();
    let message_id = frame.message_id;
    let user_id = ctx.user_id().to_string();
    let toggled = {
        let (message_id, emoji, user_id) = (message_id.clone(), emoji.clone(), user_id.clone());
        run_blocking(move || store.toggle_reaction(&message_id, &emoji, &user_id)).await
    };

    let (message, change) = match toggled {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                message_id = %message_id,
                error = %e,
                "Failed to toggle reaction"
            );
            return;
        }
    };

    tracing::debug!(
        user_id = %user_id,
        message_id = %message_id,
        change = ?change,
        "Reaction toggled"
    );

    ctx.state
        .hub
        .submit(Event::Reaction(ReactionEvent {
            room_id: message.room_id,
            message_id,
            emoji,
            user_id,
        }))
        .await;
}

async fn handle_join(ctx: &SessionContext, frame: JoinFrame) {
    let rooms = ctx.state.rooms.clone();
    let room_id = frame.room_id.clone();
    let user_id = ctx.user_id().to_string();
    let allowed = run_blocking(move || rooms.is_member(&room_id, &user_id)).await;

    match allowed {
        Ok(true) => match ctx.state.hub.join(&ctx.session, &frame.room_id).await {
            Ok(previous) => {
                tracing::info!(
                    user_id = %ctx.user_id(),
                    room_id = %frame.room_id,
                    previous = ?previous,
                    "Joined room"
                );
            }
            Err(e) => {
                tracing::debug!(user_id = %ctx.user_id(), error = %e, "Join ignored");
            }
        },
        Ok(false) => {
            tracing::debug!(
                user_id = %ctx.user_id(),
                room_id = %frame.room_id,
                "Join refused, not a room member"
            );
        }
        Err(e) => {
            tracing::warn!(
                user_id = %ctx.user_id(),
                room_id = %frame.room_id,
                error = %e,
                "Membership check failed"
            );
        }
    }
}

async fn handle_leave(ctx: &SessionContext, frame: LeaveFrame) {
    let SessionPhase::Subscribed(current) = ctx.phase() else {
        return;
    };
    if frame.room_id.as_ref().is_some_and(|r| *r != current) {
        return;
    }

    if ctx.state.hub.leave(&ctx.session, &current).await {
        tracing::info!(user_id = %ctx.user_id(), room_id = %current, "Left room");
    }
}
