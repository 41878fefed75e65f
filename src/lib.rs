//! minds-link - adapters, session loop and CLI around `minds-link-core`
//!
//! The core crate holds the coordinator and its ports; this crate provides
//! the reqwest, tokio-tungstenite and TOML adapters, the `Session` that runs
//! the tick loop, and the text rendering used by the binary.

pub mod adapters;
pub mod cli;
pub mod services;
