//! # voyago-store
//!
//! Persistence layer for the Voyago messaging backend, backed by a shared
//! PostgreSQL database.  Every server process connects to the same database,
//! which also doubles as the pub/sub relay for cross-process event fan-out
//! (owned by `voyago-realtime`).
//!
//! The crate exposes an async [`Database`] handle wrapping a `sqlx::PgPool`
//! and provides typed query helpers for every domain model.  Schema
//! migrations run automatically on connect.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
