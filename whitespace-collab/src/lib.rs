//! # whitespace-collab: collaborative session hub for whitespace
//!
//! Editors open a document over WebSocket, receive its snapshot, and from
//! then on exchange operations through the hub, which applies each one to
//! the room's buffer and relays it to everyone else in arrival order.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ HubClient   │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     JSON events     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │ SessionHub  │
//!                                     └──┬───────┬──┘
//!                          ┌─────────────┘       └────────────┐
//!                   ┌──────┴──────┐                    ┌──────┴──────┐
//!                   │ RelayGroup  │                    │ batcher     │
//!                   │ (fan-out)   │                    │ → Snapshot- │
//!                   └─────────────┘                    │   Store     │
//!                                                      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events and document identifiers
//! - [`hub`]: rooms, join/leave, apply-and-relay
//! - [`relay`]: per-room ordered fan-out
//! - `batcher`: periodic snapshot persistence (internal)
//! - [`storage`]: RocksDB and in-memory snapshot stores
//! - [`server`]: WebSocket server driving the hub
//! - [`client`]: WebSocket client

mod batcher;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod relay;
mod room;
pub mod server;
pub mod storage;

pub use client::{ConnectionState, HubClient, HubEvent};
pub use hub::{HubConfig, HubError, HubStats, JoinedRoom, SessionHub};
pub use protocol::{ClientEvent, ClientId, DocumentId, ProtocolError, ServerEvent};
pub use relay::{ChangeStream, RelayGroup, RelayStats};
pub use room::RoomPhase;
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use storage::{DocumentRecord, MemoryStore, RocksStore, SnapshotStore, StoreConfig, StoreError};
