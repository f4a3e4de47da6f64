//! Status store: durable record of agents and their services
//!
//! This module provides a trait-based abstraction over the persistence layer.
//! The hub reads and writes through it but does not own the wider schema.
//!
//! ## Design
//!
//! - **Trait-based**: `StatusStore` allows swapping implementations
//! - **Async**: all operations are async for compatibility with Tokio tasks
//! - **Upsert-oriented**: agent/service writes are idempotent last-write-wins
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database behind the `storage-sqlite` feature
//! - **In-memory**: no persistence, for testing or ephemeral deployments

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StatusStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{AgentRecord, AgentSeed, ServiceRecord, ServiceUpsert};
