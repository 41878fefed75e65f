//! minds-link core - the request/stream/status coordinator with no I/O
//!
//! This crate contains the coordinator components (request registry, transport
//! client, stream channel, status reconciler, commit workflow), the domain
//! types they exchange, and the ports (traits) through which they reach the
//! outside world. HTTP, WebSocket and filesystem access live in adapters in
//! the `minds-link` crate.

pub mod app;
pub mod domain;
pub mod error;
pub mod ports;
pub mod scene;

// Re-exports for ergonomics
pub use domain::*;
pub use error::*;
