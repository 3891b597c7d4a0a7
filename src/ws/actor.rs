use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout};

use crate::chat::events::Event;
use crate::hub::{CloseReason, SessionChannels, SessionHandle};
use crate::state::{AppState, KeepaliveSettings};
use crate::ws::protocol::{self, SessionContext};

/// How long a server-initiated close waits for the close frame to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the session's outbound event queue
///   plus a control channel for ping/pong frames
/// - Keepalive task: pings on an interval and closes the session when no
///   pong comes back in time
/// - Reader loop (this task): decodes inbound frames and dispatches them
///
/// Any of peer disconnect, eviction by a newer login, queue overflow or
/// keepalive timeout ends the reader loop, after which the session is removed
/// from the registry and its room before the writer stops.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();

    let (session, channels) = state.hub.open_session(&user_id);
    let SessionChannels { events, shutdown } = channels;
    let mut reader_shutdown = shutdown.clone();

    tracing::info!(
        user_id = %user_id,
        session_id = session.id(),
        "WebSocket actor started"
    );

    // Control frames (ping/pong) bypass the bounded event queue.
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, events, control_rx, shutdown));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = tokio::spawn(keepalive_task(
        control_tx.clone(),
        pong_rx,
        session.clone(),
        state.keepalive,
    ));

    let ctx = SessionContext::new(state.clone(), session.clone());

    // Reader loop: process incoming WebSocket messages
    loop {
        let msg = tokio::select! {
            _ = reader_shutdown.changed() => break,
            msg = ws_receiver.next() => msg,
        };

        match msg {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(&ctx, text.as_str()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %user_id,
                        len = data.len(),
                        "Binary frame ignored"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    state.hub.close_session(&session).await;

    // A server-side close has a close frame queued in the writer; let it go out.
    let close_reason = *reader_shutdown.borrow();
    match close_reason {
        Some(reason) => {
            if timeout(CLOSE_FLUSH_TIMEOUT, &mut writer_handle).await.is_err() {
                writer_handle.abort();
            }
            tracing::info!(
                user_id = %user_id,
                session_id = session.id(),
                code = reason.code(),
                "WebSocket actor stopped by server"
            );
        }
        None => {
            writer_handle.abort();
            tracing::info!(
                user_id = %user_id,
                session_id = session.id(),
                "WebSocket actor stopped"
            );
        }
    }
}

/// Writer task: forwards queued events and control frames to the WebSocket
/// sink until the session is told to close or the socket breaks.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<Arc<Event>>,
    mut control: mpsc::UnboundedReceiver<Message>,
    mut shutdown: watch::Receiver<Option<CloseReason>>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                let reason = if changed.is_ok() { *shutdown.borrow() } else { None };
                if let Some(reason) = reason {
                    let frame = CloseFrame {
                        code: reason.code(),
                        reason: reason.reason().into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                }
                break;
            }
            Some(msg) = control.recv() => {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(kind = event.kind(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Keepalive task: sends periodic pings and closes the session on a missed pong.
async fn keepalive_task(
    control: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    session: SessionHandle,
    settings: KeepaliveSettings,
) {
    let mut ping_timer = interval(settings.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if control.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died
            break;
        }

        match timeout(settings.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(
                    user_id = %session.user_id(),
                    session_id = session.id(),
                    "Pong timeout, closing connection"
                );
                session.close(CloseReason::KeepaliveTimeout);
                break;
            }
        }
    }
}
