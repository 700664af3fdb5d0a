//! Per-connection session management.
//!
//! Each WebSocket gets a Session that pumps its outbound queue into the
//! socket and feeds inbound frames to the service.

use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::ClientReceiver;
use crate::service::CounterService;
use axum::extract::ws::{Message, WebSocket};
use counter_types::{ClientEvent, ConnectionId, ServerEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered and exchanging events.
    Connected,
    /// Client asked to leave, hung up, or was dropped by the server.
    Closing,
}

/// A per-connection session.
pub struct Session {
    service: Arc<CounterService>,
    id: ConnectionId,
    outbound: ClientReceiver,
    state: SessionState,
}

impl Session {
    /// Create a session for an already registered client.
    pub fn new(service: Arc<CounterService>, id: ConnectionId, outbound: ClientReceiver) -> Self {
        Self {
            service,
            id,
            outbound,
            state: SessionState::Connected,
        }
    }

    /// Run the session until either side closes.
    pub async fn run(mut self, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();

        while self.state == SessionState::Connected {
            tokio::select! {
                // Drain queued events first so nothing is lost to a racing close.
                biased;

                event = self.outbound.recv() => match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut ws_tx, &event).await {
                            tracing::debug!("Send to {} failed: {}", self.id, e);
                            self.state = SessionState::Closing;
                        }
                    }
                    None => {
                        // Evicted or shutting down.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        self.state = SessionState::Closing;
                    }
                },

                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => self.state = SessionState::Closing,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Transport error on {}: {}", self.id, e);
                        self.state = SessionState::Closing;
                    }
                },
            }
        }

        self.service.disconnect(&self.id);
    }

    async fn handle_text(&mut self, text: &str) {
        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                self.service
                    .metrics()
                    .invalid_messages
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Ignoring invalid frame from {}: {}", self.id, e);
                return;
            }
        };

        if event == ClientEvent::Disconnect {
            self.state = SessionState::Closing;
        }

        if let Err(e) = self.service.apply(self.id, event).await {
            tracing::debug!("{:?} from {} not applied: {}", event, self.id, e);
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> ProtocolResult<()> {
    let json = event.to_json()?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| ProtocolError::Transport(e.to_string()))
}
