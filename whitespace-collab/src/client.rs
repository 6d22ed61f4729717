//! WebSocket client for the sync server.
//!
//! Connects, joins one document and surfaces hub events on an mpsc channel.
//! There is no offline queue: edits made while disconnected are the caller's
//! to keep, and a reconnect is a fresh join that reloads the snapshot.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use whitespace_core::Delta;

use crate::protocol::{ClientEvent, DocumentId, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Connected,
    /// Snapshot answering the join.
    Loaded(Delta),
    /// Operation from another editor.
    RemoteChanges(Delta),
    /// Error reported by the hub.
    Error(String),
    Pong,
    Disconnected,
}

pub struct HubClient {
    document_id: DocumentId,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<HubEvent>,
    event_rx: Option<mpsc::Receiver<HubEvent>>,
}

impl HubClient {
    /// `server_url` is a WebSocket URL such as `ws://127.0.0.1:3001`.
    pub fn new(document_id: DocumentId, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            document_id,
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<HubEvent>> {
        self.event_rx.take()
    }

    /// Connect and request the document. The snapshot arrives as
    /// [`HubEvent::Loaded`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(HubEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match ServerEvent::decode(&text) {
                            Ok(ServerEvent::LoadDocument(snapshot)) => HubEvent::Loaded(snapshot),
                            Ok(ServerEvent::ReceiveChanges(op)) => HubEvent::RemoteChanges(op),
                            Ok(ServerEvent::Error(message)) => HubEvent::Error(message),
                            Ok(ServerEvent::Pong) => HubEvent::Pong,
                            Err(e) => {
                                log::warn!("Ignoring undecodable frame: {e}");
                                continue;
                            }
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(HubEvent::Disconnected).await;
        });

        self.send(ClientEvent::GetDocument(self.document_id.to_string()))
            .await
    }

    /// Send a local operation to the other editors.
    pub async fn send_changes(&self, operation: Delta) -> Result<(), ProtocolError> {
        self.send(ClientEvent::SendChanges(operation)).await
    }

    /// Ask the hub to persist the document now.
    pub async fn save_document(&self, snapshot: Delta) -> Result<(), ProtocolError> {
        self.send(ClientEvent::SaveDocument(snapshot)).await
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(ClientEvent::Ping).await
    }

    /// Close the connection. The hub treats this as leaving the room.
    pub async fn disconnect(&mut self) {
        // Dropping the sender ends the writer task, which closes the socket.
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let frame = event.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
