//! Rate-limited, retrying fetch client with a last-known-good cache.

use std::sync::Arc;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, LayerConfig};
use crate::core::{
    ConfigError, FetchError, IdentityPolicy, LayerId, RawFeature, Snapshot, SnapshotSource,
};

use super::backoff::RetryBackoff;
use super::cache::FetchCache;

/// Fetch client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// No fetch attempted yet.
    Idle,
    /// Authentication in progress.
    Authenticating,
    /// Authenticated, not fetching.
    Authenticated,
    /// Fetch in progress.
    Fetching,
    /// Last fetch succeeded.
    Succeeded,
    /// Last attempt failed; another will follow.
    Failed,
    /// Upstream rate limit; no network I/O until `until`.
    RateLimited {
        /// End of the cooldown.
        until: Instant,
    },
    /// Attempts exhausted; only `reinitialize` resumes fetching.
    PermanentlyFailed,
}

/// Fetch client for one source feeding one layer.
///
/// [`FetchClient::fetch_snapshot`] never fails: when the source cannot be
/// reached it serves the cached snapshot, or a degraded empty snapshot when
/// nothing was ever fetched.
pub struct FetchClient<S: SnapshotSource> {
    source: Arc<S>,
    layer_id: LayerId,
    identity: IdentityPolicy,
    config: FetchConfig,
    state: FetchState,
    authenticated: bool,
    cache: FetchCache,
    backoff: RetryBackoff,
}

impl<S: SnapshotSource> FetchClient<S> {
    /// Create a client fetching `source` for the layer described by `layer`.
    pub fn new(
        source: Arc<S>,
        layer: &LayerConfig,
        config: FetchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            layer_id: layer.layer_id.clone(),
            identity: layer.identity.clone(),
            cache: FetchCache::new(config.cache_ttl),
            backoff: RetryBackoff::new(&config),
            config,
            state: FetchState::Idle,
            authenticated: false,
        })
    }

    /// Layer this client feeds.
    pub fn layer_id(&self) -> &LayerId {
        &self.layer_id
    }

    /// Current state.
    pub fn state(&self) -> FetchState {
        self.state
    }

    /// The cache.
    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Fetch the current snapshot.
    pub async fn fetch_snapshot(&mut self) -> Snapshot {
        match self.state {
            FetchState::PermanentlyFailed => {
                debug!(source = self.source.name(), "source permanently failed, serving fallback");
                return self.fallback();
            }
            FetchState::RateLimited { until } if Instant::now() < until => {
                debug!(source = self.source.name(), "rate limited, serving fallback");
                return self.fallback();
            }
            FetchState::RateLimited { .. } => {
                info!(source = self.source.name(), "rate-limit cooldown over");
                self.authenticated = false;
                self.state = FetchState::Idle;
            }
            _ => {}
        }

        if let Some(snapshot) = self.cache.fresh() {
            debug!(source = self.source.name(), "cache entry still valid");
            return snapshot;
        }

        self.backoff.reset();
        loop {
            let error = match self.attempt().await {
                Ok(raw) => {
                    let snapshot = Snapshot::from_raw(&self.layer_id, &self.identity, raw);
                    self.cache.store(snapshot.clone());
                    self.backoff.reset();
                    self.state = FetchState::Succeeded;
                    debug!(
                        source = self.source.name(),
                        features = snapshot.len(),
                        sequence = snapshot.sequence(),
                        "fetched snapshot"
                    );
                    return snapshot;
                }
                Err(e) => e,
            };

            self.authenticated = false;

            if let FetchError::RateLimited { retry_after } = error {
                let cooldown = retry_after
                    .map_or(self.config.rate_limit_cooldown, |r| {
                        r.max(self.config.rate_limit_cooldown)
                    });
                self.state = FetchState::RateLimited {
                    until: Instant::now() + cooldown,
                };
                warn!(source = self.source.name(), ?cooldown, "rate limited by upstream");
                return self.fallback();
            }

            self.state = FetchState::Failed;
            match self.backoff.backoff() {
                Some(delay) => {
                    debug!(
                        source = self.source.name(),
                        attempt = self.backoff.attempts(),
                        ?delay,
                        error = %error,
                        "fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                None => {
                    self.state = FetchState::PermanentlyFailed;
                    warn!(
                        source = self.source.name(),
                        attempts = self.backoff.attempts(),
                        error = %error,
                        "fetch failed permanently"
                    );
                    return self.fallback();
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<Vec<RawFeature>, FetchError> {
        if !self.authenticated {
            self.state = FetchState::Authenticating;
            self.source.authenticate().await?;
            self.authenticated = true;
            self.state = FetchState::Authenticated;
        }
        self.state = FetchState::Fetching;
        self.source.fetch().await
    }

    fn fallback(&self) -> Snapshot {
        self.cache.stale().unwrap_or_else(Snapshot::degraded)
    }

    /// Drop the cached snapshot.
    pub fn clear_cache(&mut self) {
        self.cache.invalidate();
        debug!(source = self.source.name(), "cache cleared");
    }

    /// Return to `Idle` so the next fetch re-authenticates, including from
    /// `PermanentlyFailed` or an active cooldown.
    pub fn reinitialize(&mut self) {
        self.state = FetchState::Idle;
        self.authenticated = false;
        self.backoff.reset();
        info!(source = self.source.name(), "fetch client reinitialized");
    }
}
