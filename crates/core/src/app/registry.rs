use crate::domain::request::{PendingRequest, RequestId, RequestKind};
use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limits for the request registry
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub max_concurrent: usize,
    /// Extra time past a request's own timeout before it is reclaimed
    pub grace: Duration,
    /// Ids wrap back to 1 after this value
    pub id_wrap: u64,
}

impl RegistryConfig {
    /// There must be more ids than requests that can be in flight at once
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(CoreError::configuration("max_concurrent must be at least 1"));
        }
        if self.max_concurrent as u64 >= self.id_wrap {
            return Err(CoreError::configuration(format!(
                "max_concurrent ({}) must be below id_wrap ({})",
                self.max_concurrent, self.id_wrap
            )));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            grace: Duration::from_secs(5),
            id_wrap: 1_000_000,
        }
    }
}

/// Tracks in-flight requests from dispatch until their single terminal event
#[derive(Debug)]
pub struct RequestRegistry {
    config: RegistryConfig,
    last_id: u64,
    pending: HashMap<RequestId, PendingRequest>,
}

impl RequestRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            last_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a request without a dispatch step
    pub fn submit(
        &mut self,
        kind: RequestKind,
        url: impl Into<String>,
        timeout: Duration,
        now: Instant,
    ) -> Result<RequestId> {
        self.submit_with(kind, url, timeout, now, |_| Ok(()))
    }

    /// Check capacity, run `dispatch` with the id the request will get, and
    /// record the request only if dispatch accepted it
    pub fn submit_with<F>(
        &mut self,
        kind: RequestKind,
        url: impl Into<String>,
        timeout: Duration,
        now: Instant,
        dispatch: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(RequestId) -> anyhow::Result<()>,
    {
        if self.is_full() {
            warn!(
                "Rejecting {} request: {} already in flight",
                kind,
                self.pending.len()
            );
            return Err(CoreError::Capacity {
                limit: self.limit(),
            });
        }

        let url = url.into();
        let id = self.peek_next_id();
        dispatch(id).map_err(|e| CoreError::Network {
            message: format!("{:#}", e),
            refused: false,
        })?;

        self.last_id = id.0;
        debug!("Tracking {} ({}) {}", id, kind, url);
        self.pending.insert(
            id,
            PendingRequest {
                id,
                kind,
                url,
                started_at: now,
                timeout,
            },
        );
        Ok(id)
    }

    /// Remove a finished request; unknown ids are logged and ignored
    pub fn complete(&mut self, id: RequestId) -> Option<PendingRequest> {
        let removed = self.pending.remove(&id);
        if removed.is_none() {
            warn!("Completion for unknown request {} (already reclaimed?)", id);
        }
        removed
    }

    /// Reclaim every request older than its timeout plus grace
    pub fn sweep(&mut self, now: Instant) -> Vec<PendingRequest> {
        let grace = self.config.grace;
        let expired: Vec<RequestId> = self
            .pending
            .values()
            .filter(|p| p.elapsed(now) > p.timeout + grace)
            .map(|p| p.id)
            .collect();

        let mut reclaimed: Vec<PendingRequest> = expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();
        reclaimed.sort_by_key(|p| p.started_at);

        for request in &reclaimed {
            warn!(
                "Request {} ({}) timed out after {:?}",
                request.id,
                request.kind,
                request.elapsed(now)
            );
        }
        reclaimed
    }

    /// Remove everything (shutdown)
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.pending.drain().map(|(_, request)| request).collect()
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.limit()
    }

    /// The ceiling, never more than the number of distinct ids
    fn limit(&self) -> usize {
        let ids = usize::try_from(self.config.id_wrap).unwrap_or(usize::MAX);
        self.config.max_concurrent.min(ids)
    }

    /// Whether any request of this kind is in flight
    pub fn has_pending_kind(&self, kind: &RequestKind) -> bool {
        self.pending.values().any(|p| &p.kind == kind)
    }

    fn peek_next_id(&self) -> RequestId {
        let mut candidate = self.last_id;
        loop {
            candidate = if candidate >= self.config.id_wrap {
                1
            } else {
                candidate + 1
            };
            // Fewer than id_wrap ids are taken, so this terminates
            if !self.pending.contains_key(&RequestId(candidate)) {
                return RequestId(candidate);
            }
        }
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
