use futures::future::join_all;
use log::{debug, info, warn};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use super::config::PoolConfig;
use super::endpoint::{EndpointDefinition, EndpointId, ProxyEndpoint};
use super::loader::{EndpointSource, load_definitions};
use super::probe::{ProbeFailure, Prober};
use super::stats::PoolStats;
use crate::Result;
use crate::task::BackgroundTask;

/// Message recorded on an endpoint whose lease was released as failed
const RELEASE_FAILURE: &str = "request through endpoint failed";

/// Outcome of one probe cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Endpoints probed
    pub checked: usize,
    /// Probes that succeeded
    pub passed: usize,
    /// Healthy endpoints after the cycle
    pub healthy: usize,
}

/// Bounded set of proxy endpoints with health tracking.
///
/// All endpoint state sits behind one lock, so picking the best endpoint
/// and reserving a lease on it is a single atomic step. Probing happens
/// without the lock; only the results are applied under it.
#[derive(Debug)]
pub struct ProxyPool {
    config: PoolConfig,
    endpoints: Mutex<BTreeMap<EndpointId, ProxyEndpoint>>,
}

impl ProxyPool {
    /// Create a pool from already parsed definitions.
    /// Definitions beyond `max_endpoints` are ignored.
    #[must_use]
    pub fn new(config: PoolConfig, definitions: Vec<EndpointDefinition>) -> Self {
        let pool = Self {
            config,
            endpoints: Mutex::new(BTreeMap::new()),
        };
        pool.reload(definitions);
        pool
    }

    /// Create a pool from the definitions offered by `source`.
    ///
    /// Malformed definitions are skipped, so the pool may end up with fewer
    /// endpoints than the source lists, or none at all.
    ///
    /// # Errors
    ///
    /// Fails only if the source as a whole cannot be read.
    pub async fn load(config: PoolConfig, source: &dyn EndpointSource) -> Result<Self> {
        let definitions = load_definitions(source, config.max_endpoints).await?;
        Ok(Self::new(config, definitions))
    }

    /// Replace the endpoint set.
    ///
    /// Endpoints that persist keep their health history and outstanding
    /// leases, new ones start healthy, and missing ones are dropped.
    /// Returns the number of pooled endpoints afterwards.
    pub fn reload(&self, definitions: Vec<EndpointDefinition>) -> usize {
        let mut endpoints = self.lock();
        let mut previous = std::mem::take(&mut *endpoints);

        for definition in definitions.into_iter().take(self.config.max_endpoints) {
            let endpoint = match previous.remove(&definition.id) {
                Some(mut existing) => {
                    existing.host = definition.host;
                    existing.port = definition.port;
                    existing
                }
                None => {
                    debug!("Adding endpoint {} ({})", definition.id, definition.address());
                    ProxyEndpoint::new(
                        definition,
                        self.config.protocol,
                        self.config.per_endpoint_concurrency,
                    )
                }
            };
            endpoints.insert(endpoint.id.clone(), endpoint);
        }

        for id in previous.keys() {
            debug!("Dropping endpoint {id}");
        }
        info!("Proxy pool holds {} endpoints", endpoints.len());
        endpoints.len()
    }

    /// Re-read definitions from `source` and [`reload`](Self::reload).
    ///
    /// # Errors
    ///
    /// Fails only if the source as a whole cannot be read; the pool is left
    /// unchanged in that case.
    pub async fn reload_from(&self, source: &dyn EndpointSource) -> Result<usize> {
        let definitions = load_definitions(source, self.config.max_endpoints).await?;
        Ok(self.reload(definitions))
    }

    /// Pick the best eligible endpoint and reserve a lease on it.
    ///
    /// Eligible endpoints are healthy and below their concurrency ceiling.
    /// The highest [`health_score`](ProxyEndpoint::health_score) wins; ties
    /// go to the endpoint with fewer leases, then to the one used least
    /// recently. The returned snapshot already reflects the reservation.
    /// Every `Some` must be paired with a [`release`](Self::release).
    #[must_use]
    pub fn best(&self) -> Option<ProxyEndpoint> {
        let mut endpoints = self.lock();

        let Some(best) = endpoints
            .values_mut()
            .filter(|endpoint| endpoint.is_healthy() && endpoint.has_capacity())
            .max_by(|a, b| rank(a, b))
        else {
            warn!("No healthy proxy endpoint with spare capacity");
            return None;
        };

        best.concurrent_requests += 1;
        best.last_used = Some(Instant::now());
        debug!(
            "Leased endpoint {} ({}/{})",
            best.id, best.concurrent_requests, best.max_concurrent
        );
        Some(best.clone())
    }

    /// Return a lease and record its outcome.
    ///
    /// A failure counts towards the failure threshold and marks the
    /// endpoint unhealthy once reached. A success never makes an endpoint
    /// healthy again; only a passing probe does. Returns `false` if the
    /// endpoint is no longer pooled.
    pub fn release(&self, id: &EndpointId, success: bool) -> bool {
        let threshold = self.config.failure_threshold;
        let mut endpoints = self.lock();
        let Some(endpoint) = endpoints.get_mut(id) else {
            debug!("Released endpoint {id} is no longer pooled");
            return false;
        };

        endpoint.concurrent_requests = endpoint.concurrent_requests.saturating_sub(1);
        if success {
            endpoint.success_count += 1;
        } else {
            endpoint.error_count += 1;
            endpoint.last_error = Some(RELEASE_FAILURE.to_string());
            if endpoint.healthy && endpoint.error_count >= threshold {
                endpoint.healthy = false;
                warn!(
                    "Endpoint {id} marked unhealthy after {} failures",
                    endpoint.error_count
                );
            }
        }
        true
    }

    /// Probe every endpoint concurrently and apply the results.
    ///
    /// Each probe is bounded by `probe_timeout`. Failures only change
    /// endpoint state.
    pub async fn probe_all(&self, prober: &dyn Prober) -> ProbeReport {
        let snapshot: Vec<ProxyEndpoint> = self.lock().values().cloned().collect();
        if snapshot.is_empty() {
            return ProbeReport::default();
        }

        let timeout = self.config.probe_timeout;
        let outcomes = join_all(snapshot.iter().map(|endpoint| async move {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, prober.probe(endpoint)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProbeFailure::Timeout(timeout)),
            };
            (endpoint.id.clone(), outcome, started.elapsed())
        }))
        .await;

        let threshold = self.config.failure_threshold;
        let now = Instant::now();
        let mut endpoints = self.lock();
        let mut report = ProbeReport::default();
        for (id, outcome, elapsed) in outcomes {
            // Dropped by a reload while being probed
            let Some(endpoint) = endpoints.get_mut(&id) else {
                continue;
            };
            report.checked += 1;
            endpoint.response_time = Some(elapsed);
            endpoint.last_checked = Some(now);

            match outcome {
                Ok(()) => {
                    report.passed += 1;
                    if !endpoint.healthy {
                        info!("Endpoint {id} is healthy again");
                    }
                    endpoint.healthy = true;
                    endpoint.success_count += 1;
                    endpoint.error_count = endpoint.error_count.saturating_sub(1);
                    endpoint.last_error = None;
                }
                Err(failure) => {
                    warn!("Probe of endpoint {id} failed: {failure}");
                    endpoint.error_count += 1;
                    endpoint.last_error = Some(failure.to_string());
                    if endpoint.healthy && endpoint.error_count >= threshold {
                        endpoint.healthy = false;
                        warn!(
                            "Endpoint {id} marked unhealthy after {} failures",
                            endpoint.error_count
                        );
                    }
                }
            }
        }

        report.healthy = endpoints.values().filter(|e| e.is_healthy()).count();
        info!(
            "Probe cycle done: {}/{} endpoints healthy",
            report.healthy,
            endpoints.len()
        );
        report
    }

    /// Run [`probe_all`](Self::probe_all) right away and then every
    /// `probe_interval`, until the returned task is shut down.
    #[must_use]
    pub fn spawn_health_monitor(self: &Arc<Self>, prober: Arc<dyn Prober>) -> BackgroundTask {
        let pool = Arc::clone(self);
        let interval = pool.config.probe_interval;
        info!("Starting proxy health probes every {interval:?}");

        BackgroundTask::spawn("proxy-health", std::time::Duration::ZERO, interval, move || {
            let pool = Arc::clone(&pool);
            let prober = Arc::clone(&prober);
            async move {
                pool.probe_all(prober.as_ref()).await;
            }
        })
    }

    /// Aggregate and per-endpoint statistics. Pure read.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::collect(self.lock().values())
    }

    /// Snapshot of a single endpoint
    #[must_use]
    pub fn get(&self, id: &EndpointId) -> Option<ProxyEndpoint> {
        self.lock().get(id).cloned()
    }

    /// Number of pooled endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the pool holds no endpoint at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The configuration this pool was built with
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<EndpointId, ProxyEndpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Selection order: higher score, then fewer leases, then least recently used
fn rank(a: &ProxyEndpoint, b: &ProxyEndpoint) -> Ordering {
    a.health_score()
        .total_cmp(&b.health_score())
        .then_with(|| Reverse(a.concurrent_requests).cmp(&Reverse(b.concurrent_requests)))
        .then_with(|| Reverse(a.last_used).cmp(&Reverse(b.last_used)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct FixedProber {
        failing: HashSet<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, endpoint: &ProxyEndpoint) -> std::result::Result<(), ProbeFailure> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(endpoint.id().as_str()) {
                Err(ProbeFailure::Request("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn definition(name: &str) -> EndpointDefinition {
        EndpointDefinition {
            id: EndpointId::from(name),
            host: "127.0.0.1".to_string(),
            port: 40000,
        }
    }

    fn pool(names: &[&str], per_endpoint: usize) -> ProxyPool {
        let config = PoolConfig {
            per_endpoint_concurrency: per_endpoint,
            ..PoolConfig::default()
        };
        ProxyPool::new(config, names.iter().map(|n| definition(n)).collect())
    }

    #[test]
    fn test_best_reserves_lease() {
        let pool = pool(&["a"], 2);
        let leased = pool.best().unwrap();
        assert_eq!(leased.concurrent_requests(), 1);
        assert!(leased.last_used().is_some());
        assert_eq!(pool.get(leased.id()).unwrap().concurrent_requests(), 1);

        pool.best().unwrap();
        assert!(pool.best().is_none());

        assert!(pool.release(leased.id(), true));
        assert!(pool.best().is_some());
    }

    #[test]
    fn test_best_spreads_load_on_ties() {
        let pool = pool(&["a", "b"], 4);
        let first = pool.best().unwrap();
        let second = pool.best().unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_best_prefers_higher_score() {
        let pool = pool(&["a", "b"], 4);
        let (a, b) = (EndpointId::from("a"), EndpointId::from("b"));
        pool.best().unwrap();
        pool.best().unwrap();
        pool.release(&a, false);
        pool.release(&b, true);

        assert_eq!(pool.best().unwrap().id(), &b);
    }

    #[test]
    fn test_release_never_underflows() {
        let pool = pool(&["a"], 4);
        let id = EndpointId::from("a");
        assert!(pool.release(&id, true));
        assert_eq!(pool.get(&id).unwrap().concurrent_requests(), 0);
        assert!(!pool.release(&EndpointId::from("missing"), true));
    }

    #[test]
    fn test_release_failures_reach_threshold() {
        let pool = pool(&["a"], 8);
        let id = EndpointId::from("a");
        for _ in 0..4 {
            pool.best().unwrap();
            pool.release(&id, false);
        }
        assert!(pool.get(&id).unwrap().is_healthy());

        pool.best().unwrap();
        pool.release(&id, false);
        let endpoint = pool.get(&id).unwrap();
        assert!(!endpoint.is_healthy());
        assert_eq!(endpoint.last_error(), Some(RELEASE_FAILURE));

        // A successful release does not bring it back
        pool.release(&id, true);
        assert!(!pool.get(&id).unwrap().is_healthy());
        assert!(pool.best().is_none());
    }

    #[tokio::test]
    async fn test_probe_restores_health_and_decays_errors() {
        let pool = pool(&["a"], 8);
        let id = EndpointId::from("a");
        for _ in 0..5 {
            pool.best().unwrap();
            pool.release(&id, false);
        }
        assert!(!pool.get(&id).unwrap().is_healthy());

        let report = pool.probe_all(&FixedProber::default()).await;
        assert_eq!(
            report,
            ProbeReport {
                checked: 1,
                passed: 1,
                healthy: 1
            }
        );
        let endpoint = pool.get(&id).unwrap();
        assert!(endpoint.is_healthy());
        assert_eq!(endpoint.error_count(), 4);
        assert_eq!(endpoint.success_count(), 1);
        assert!(endpoint.last_checked().is_some());
        assert!(endpoint.response_time().is_some());
    }

    #[tokio::test]
    async fn test_probe_failures_reach_threshold() {
        let pool = pool(&["a", "b"], 4);
        let prober = FixedProber {
            failing: HashSet::from(["a".to_string()]),
            delay: None,
        };

        for _ in 0..4 {
            pool.probe_all(&prober).await;
        }
        let a = pool.get(&EndpointId::from("a")).unwrap();
        assert!(a.is_healthy());
        assert_eq!(a.last_error(), Some("request failed: connection refused"));

        let report = pool.probe_all(&prober).await;
        assert_eq!(report.passed, 1);
        assert_eq!(report.healthy, 1);
        assert!(!pool.get(&EndpointId::from("a")).unwrap().is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let config = PoolConfig {
            probe_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        };
        let pool = ProxyPool::new(config, vec![definition("slow")]);
        let prober = FixedProber {
            failing: HashSet::new(),
            delay: Some(Duration::from_secs(30)),
        };

        let report = pool.probe_all(&prober).await;
        assert_eq!(report.passed, 0);
        let endpoint = pool.get(&EndpointId::from("slow")).unwrap();
        assert_eq!(endpoint.error_count(), 1);
        assert_eq!(endpoint.response_time(), Some(Duration::from_secs(1)));
        assert_eq!(endpoint.last_error(), Some("probe timed out after 1s"));
    }

    #[test]
    fn test_reload_preserves_history() {
        let pool = pool(&["a", "b"], 4);
        let a = EndpointId::from("a");
        pool.best().unwrap();
        pool.release(&a, false);
        let leased = pool.best().unwrap();

        assert_eq!(pool.reload(vec![definition("a"), definition("c")]), 2);

        let kept = pool.get(&a).unwrap();
        assert_eq!(kept.error_count(), 1);
        assert!(pool.get(&EndpointId::from("b")).is_none());
        assert!(pool.get(&EndpointId::from("c")).unwrap().is_healthy());
        // `a` scored zero after its failure, so the lease went to `b`,
        // which is forgotten along with the endpoint
        assert_eq!(leased.id(), &EndpointId::from("b"));
        assert!(!pool.release(leased.id(), true));
    }

    #[test]
    fn test_reload_is_capped() {
        let config = PoolConfig {
            max_endpoints: 2,
            ..PoolConfig::default()
        };
        let pool = ProxyPool::new(config, vec![definition("a"), definition("b"), definition("c")]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_empty_pool() {
        let pool = pool(&[], 4);
        assert!(pool.is_empty());
        assert!(pool.best().is_none());
        assert_eq!(pool.stats(), PoolStats::default());
    }
}
