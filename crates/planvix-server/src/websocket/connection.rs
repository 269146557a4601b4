//! A single feed connection from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use planvix_core::{PING, pong_message};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, info, instrument, warn};

use super::heartbeat::enforce_liveness;
use super::manager::{SessionManager, SessionSlot};
use super::session::{CloseReason, SubscriberSession};
use crate::auth::AdminIdentity;

/// How long the writer may take to flush its close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Serve one authorized subscriber.
///
/// 1. Admits the session (replay goes out before any live event)
/// 2. Forwards the outbound queue to the socket on a writer task
/// 3. Answers `"ping"` with a pong; discards anything else
/// 4. Watches liveness and closes silent sessions
/// 5. Removes the session on any exit path
#[instrument(skip_all, fields(session_id = field::Empty, admin = %identity.subject))]
pub async fn run_subscriber(
    ws: WebSocket,
    slot: SessionSlot,
    identity: AdminIdentity,
    sessions: Arc<SessionManager>,
    keepalive_interval: Duration,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (session, mut outbound_rx) = match sessions.admit(slot, &identity).await {
        Ok(admitted) => admitted,
        Err(error) => {
            warn!(%error, "admission failed");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let id = session.id.clone();
    let _ = Span::current().record("session_id", id.as_str());

    let mut writer = {
        let session = Arc::clone(&session);
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = outbound_rx.recv() => {
                        let Some(text) = msg else { break };
                        if let Err(error) = ws_tx.send(Message::Text(text.as_str().into())).await {
                            debug!(%error, "websocket write failed");
                            let _ = sessions.disconnect(&session.id, CloseReason::TransportError).await;
                            return;
                        }
                    }
                    () = session.closed() => break,
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        })
    };

    let liveness = tokio::spawn(enforce_liveness(
        Arc::clone(&sessions),
        Arc::clone(&session),
        keepalive_interval,
    ));

    let reason = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(error)) => {
                        debug!(%error, "websocket read failed");
                        break Some(CloseReason::TransportError);
                    }
                    None => break Some(CloseReason::ClientClosed),
                };
                session.touch();
                match msg {
                    Message::Text(text) => handle_text(&session, text.as_str()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(&session, text),
                        Err(_) => debug!(len = data.len(), "discarding non-UTF8 binary frame"),
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break Some(CloseReason::ClientClosed);
                    }
                    // Protocol-level ping/pong only count as traffic.
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            () = session.closed() => break None,
            () = shutdown.cancelled() => break Some(CloseReason::ServerShutdown),
        }
    };

    if let Some(reason) = reason {
        let _ = sessions.disconnect(&id, reason).await;
    }
    liveness.abort();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}

fn handle_text(session: &SubscriberSession, text: &str) {
    if text.trim() != PING {
        debug!(len = text.len(), "discarding unrecognized client message");
        return;
    }
    session.record_ping();
    match session.send_direct(Arc::new(pong_message())) {
        Ok(()) => session.record_pong(),
        Err(error) => debug!(%error, "pong not enqueued"),
    }
}
