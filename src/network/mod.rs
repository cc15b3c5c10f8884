//! Network layer
//!
//! The inbound HTTP listener, the upstream client and bounded connection
//! handling.

mod client;
mod connection_pool;
mod server;

pub use client::HttpUpstream;
pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use server::{ProxyServer, HEALTH_BODY};

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
