//! Connection-lifecycle and broadcast engine for a fleet-status control plane
//!
//! Remote monitoring agents hold persistent connections to this hub, report
//! the health of their services, and the hub fans live status changes out to
//! subscribed observers. The heart of the crate is the grace-period debounce:
//! a raw disconnect only becomes a confirmed offline transition if the agent
//! stays away past the configured window.
//!
//! ```text
//! Agent socket ──> ConnectionManager ──> StatusStore (upsert)
//!                        │
//!                        └──> BroadcastRouter ──> EventBus ──> stream clients
//!                        │
//!                        └──> NotifyHandle (push signal, fire-and-forget)
//! ```

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod protocol;
pub mod router;
pub mod storage;

pub use error::{HubError, HubResult};
