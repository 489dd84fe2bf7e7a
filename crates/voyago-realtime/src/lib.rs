//! # voyago-realtime
//!
//! Presence tracking and realtime event delivery for the Voyago messaging
//! backend.
//!
//! This crate provides:
//! - **Presence registry**: a process-local map from user identity to the
//!   live connection that can reach it
//! - **Realtime gateway**: the connection lifecycle plus the
//!   `emit_to_user` / `emit_to_all` emission primitives
//! - **Fan-out adapter**: a PostgreSQL LISTEN/NOTIFY relay so that emits
//!   reach clients connected to *other* server processes sharing the same
//!   database
//!
//! Push delivery is best-effort only: a recipient with no live connection
//! anywhere simply misses the event, and clients reconcile by refetching
//! message history, which stays authoritative.

pub mod events;
pub mod fanout;
pub mod gateway;
pub mod presence;

mod error;

pub use error::RealtimeError;
pub use events::{OutboundEvent, EVENT_NEW_MESSAGE, EVENT_ONLINE_USERS};
pub use fanout::FanoutAdapter;
pub use gateway::Gateway;
pub use presence::{ConnectionHandle, ConnectionId, PresenceRegistry};
