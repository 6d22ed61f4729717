//! WebSocket front end for the session hub.
//!
//! Architecture:
//! ```text
//! TcpListener → accept → tokio::spawn(handle_connection)
//!   Connection (fresh ClientId)
//!     ├── get-document  → hub.join  → load-document | error
//!     ├── send-changes  → hub.apply_and_relay
//!     ├── save-document → hub.flush
//!     └── ChangeStream  → receive-changes
//! ```
//!
//! A connection is in at most one room. Sending `get-document` again moves
//! it to the new room. When the socket closes the connection leaves its
//! room, which drains and closes the room if it was the last one.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::hub::{HubConfig, SessionHub};
use crate::protocol::{ClientEvent, ClientId, DocumentId, ProtocolError, ServerEvent};
use crate::relay::ChangeStream;
use crate::storage::{MemoryStore, RocksStore, SnapshotStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            storage_path: None,
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn for_testing(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            storage_path: None,
            hub: HubConfig::for_testing(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub malformed_messages: u64,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Room membership of one connection.
struct Session {
    document_id: DocumentId,
    changes: ChangeStream,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<SessionHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening the RocksDB store when a storage path is set.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn SnapshotStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => {
                log::warn!("No storage path configured, documents are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(config, store))
    }

    /// Create a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let hub = Arc::new(SessionHub::new(config.hub.clone(), store));
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Listen for WebSocket connections until the task is cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Listen until `shutdown` resolves, then flush every open room.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("New TCP connection from {addr}");

                    let hub = self.hub.clone();
                    let stats = self.stats.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, hub, stats).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }

        let failures = self.hub.flush_all().await;
        if failures > 0 {
            log::error!("{failures} rooms could not be flushed on shutdown");
        }
        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<SessionHub>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), ConnectionError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let client: ClientId = Uuid::new_v4();
        log::info!("WebSocket connection established from {addr} as {client}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut session: Option<Session> = None;
        let result = Self::serve(ws_stream, client, &hub, &stats, &mut session).await;

        // Leave even when the loop ended with an error.
        if let Some(session) = session {
            if let Err(e) = hub.leave(&session.document_id, client).await {
                log::error!("Leaving {} for {client} failed: {e}", session.document_id);
            }
        }
        stats.write().await.active_connections -= 1;
        log::info!("Connection closed from {addr}");

        result
    }

    async fn serve(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        client: ClientId,
        hub: &SessionHub,
        stats: &RwLock<ServerStats>,
        session: &mut Option<Session>,
    ) -> Result<(), ConnectionError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            match ClientEvent::decode(&text) {
                                Ok(event) => {
                                    if let Some(reply) = Self::handle_event(event, client, hub, session).await {
                                        send_event(&mut ws_sender, &reply).await?;
                                    }
                                }
                                Err(e) => {
                                    stats.write().await.malformed_messages += 1;
                                    log::warn!("Failed to decode message from {client}: {e}");
                                    send_event(&mut ws_sender, &ServerEvent::Error("Malformed message".into())).await?;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {client}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                change = async {
                    match session.as_mut() {
                        Some(session) => session.changes.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match change {
                        Some(operation) => {
                            send_event(&mut ws_sender, &ServerEvent::ReceiveChanges(operation)).await?;
                        }
                        None => {
                            log::debug!("Room closed under {client}");
                            *session = None;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Run one client event against the hub; returns the reply, if any.
    async fn handle_event(
        event: ClientEvent,
        client: ClientId,
        hub: &SessionHub,
        session: &mut Option<Session>,
    ) -> Option<ServerEvent> {
        match event {
            ClientEvent::GetDocument(raw_id) => {
                if let Some(previous) = session.take() {
                    if let Err(e) = hub.leave(&previous.document_id, client).await {
                        log::warn!("Leaving {} for {client} failed: {e}", previous.document_id);
                    }
                }
                match hub.join(&raw_id, client).await {
                    Ok(joined) => {
                        *session = Some(Session {
                            document_id: joined.document_id,
                            changes: joined.changes,
                        });
                        Some(ServerEvent::LoadDocument(joined.snapshot))
                    }
                    Err(e) => {
                        log::warn!("Join of {raw_id:?} by {client} failed: {e}");
                        Some(ServerEvent::Error(e.to_string()))
                    }
                }
            }
            ClientEvent::SendChanges(operation) => {
                let Some(session) = session.as_ref() else {
                    return Some(ServerEvent::Error("No document loaded".into()));
                };
                match hub.apply_and_relay(&session.document_id, client, operation).await {
                    Ok(_) => None,
                    Err(e) => Some(ServerEvent::Error(e.to_string())),
                }
            }
            ClientEvent::SaveDocument(payload) => {
                let Some(session) = session.as_ref() else {
                    return Some(ServerEvent::Error("No document loaded".into()));
                };
                // The hub's own copy is what gets saved.
                if !payload.is_insert_only() {
                    log::warn!(
                        "Save request from {client} for {} carries an edit, not a snapshot",
                        session.document_id
                    );
                }
                match hub.flush(&session.document_id).await {
                    Ok(_) => None,
                    Err(e) => {
                        log::error!("Save of {} failed: {e}", session.document_id);
                        Some(ServerEvent::Error(e.to_string()))
                    }
                }
            }
            ClientEvent::Ping => Some(ServerEvent::Pong),
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ConnectionError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = event.encode()?;
    sink.send(Message::Text(frame.into())).await?;
    Ok(())
}
