//! HTTP proxy with cassette-backed recording and replay

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cassette::{matcher, policy, CassetteStore, Decision, Interaction, RecordMode};
use crate::config::Config;
use crate::headers::HeaderTable;
use crate::network::HttpUpstream;
use crate::request::{InboundRequest, RequestDescriptor, ResponseDescriptor};
use crate::{ProxyError, Result};

use super::Upstream;

/// Mode every transaction runs under, whatever the cassette stores
pub const TRANSACTION_RECORD_MODE: RecordMode = RecordMode::NewEpisodes;

/// Cassette-backed HTTP proxy
pub struct CassetteProxy {
    store: Arc<CassetteStore>,
    upstream: Arc<dyn Upstream>,
    headers: HeaderTable,
    record_mode: RecordMode,
    replayed: AtomicUsize,
    recorded: AtomicUsize,
    failed: AtomicUsize,
}

impl CassetteProxy {
    /// Create a proxy over `store` that records from `upstream`
    #[must_use]
    pub fn new(
        store: Arc<CassetteStore>,
        upstream: Arc<dyn Upstream>,
        headers: HeaderTable,
    ) -> Self {
        Self {
            store,
            upstream,
            headers,
            record_mode: TRANSACTION_RECORD_MODE,
            replayed: AtomicUsize::new(0),
            recorded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Build the store and the HTTP upstream client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the upstream endpoint is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(CassetteStore::new(
            config.cassette_dir.clone(),
            config.cassettes,
        ));
        let upstream = Arc::new(HttpUpstream::new(
            &config.upstream,
            Duration::from_millis(config.limits.upstream_timeout_ms),
        )?);

        Ok(Self::new(
            store,
            upstream,
            HeaderTable::new(config.headers.clone()),
        ))
    }

    /// Override the transaction record mode
    #[must_use]
    pub fn with_record_mode(mut self, record_mode: RecordMode) -> Self {
        self.record_mode = record_mode;
        self
    }

    /// Record mode transactions run under
    #[must_use]
    pub fn record_mode(&self) -> RecordMode {
        self.record_mode
    }

    /// Underlying cassette store
    #[must_use]
    pub fn store(&self) -> &CassetteStore {
        &self.store
    }

    /// Normalise an inbound request and handle it
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMethod` before any cassette is touched, or any
    /// error from [`CassetteProxy::handle`]
    pub async fn handle_inbound(&self, inbound: InboundRequest) -> Result<ResponseDescriptor> {
        let request = RequestDescriptor::ingest(inbound, &self.headers).map_err(|e| {
            self.failed.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        self.handle(request).await
    }

    /// Replay, record or refuse one request
    ///
    /// # Errors
    ///
    /// Returns `NoCassetteMatch`, `Upstream` or `StorageCorruption` as the
    /// transaction dictates
    pub async fn handle(&self, request: RequestDescriptor) -> Result<ResponseDescriptor> {
        let name = request.fingerprint();
        debug!("{} {} -> cassette {}", request.method, request.path, name);

        let result = self
            .store
            .with_exclusive_access(&name, || self.transaction(&name, &request))
            .await;

        if result.is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn transaction(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<ResponseDescriptor> {
        let mut cassette = self.store.open(name)?;
        let matched = matcher::find(&cassette, name, cassette.options.allow_playback_repeats);

        match policy::decide(self.record_mode, matched, cassette.is_new()) {
            Decision::Replay(index) => {
                let response = cassette.mark_played(index).ok_or_else(|| {
                    ProxyError::Other(format!("Interaction {index} missing from {name}"))
                })?;
                // Counts only decide anything once interactions can run out
                if !cassette.options.allow_playback_repeats {
                    self.store.persist(&mut cassette)?;
                }
                self.replayed.fetch_add(1, Ordering::Relaxed);

                debug!(
                    "Replayed {} {} -> {} (cassette {})",
                    request.method, request.path, response.status, name
                );
                Ok(response)
            }
            Decision::Record => {
                let response = self.upstream.dispatch(request).await.map_err(|e| {
                    warn!(
                        "Upstream call for {} {} failed: {}",
                        request.method, request.path, e
                    );
                    e
                })?;

                let stored = RequestDescriptor {
                    headers: self.headers.redact_for_storage(&request.headers),
                    ..request.clone()
                };
                cassette.push(Interaction::new(stored, response.clone()));
                self.store.persist(&mut cassette)?;
                self.recorded.fetch_add(1, Ordering::Relaxed);

                info!(
                    "Recorded {} {} -> {} (cassette {}, {} interactions)",
                    request.method,
                    request.path,
                    response.status,
                    name,
                    cassette.len()
                );
                Ok(response)
            }
            Decision::Fail => {
                warn!(
                    "No recorded interaction for {} {} (cassette {})",
                    request.method, request.path, name
                );
                Err(ProxyError::NoCassetteMatch {
                    cassette: name.to_string(),
                    mode: self.record_mode,
                })
            }
        }
    }

    /// Counters since start-up
    #[must_use]
    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            replayed: self.replayed.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Proxy counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Responses served from cassettes
    pub replayed: usize,
    /// Responses fetched upstream and recorded
    pub recorded: usize,
    /// Requests that ended in an error
    pub failed: usize,
}
