//! Proxy orchestration: fingerprint, lock, decide, replay or record

mod http;

pub use http::{CassetteProxy, ProxyStats, TRANSACTION_RECORD_MODE};

use async_trait::async_trait;

use crate::request::{RequestDescriptor, ResponseDescriptor};
use crate::Result;

/// Transport used for live calls to the real service
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` upstream and return the full response
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Upstream` on transport failure or timeout
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor>;
}
