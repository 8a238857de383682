use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::config::Protocol;

/// Response time above which an endpoint's score is penalized
const SLOW_RESPONSE: Duration = Duration::from_secs(5);

/// Response time excess over [`SLOW_RESPONSE`] that cancels the score
const SLOW_RESPONSE_SPAN_SECS: f64 = 10.0;

/// Lowest factor the latency penalty may reduce a score to
const MIN_LATENCY_FACTOR: f64 = 0.1;

/// Factor applied to an endpoint at its concurrency ceiling
const AT_CAPACITY_FACTOR: f64 = 0.1;

/// Identity of a pooled endpoint, derived from its definition name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an id from a definition name, e.g. the file stem of
    /// `warp-1.conf` becomes `warp_warp-1`.
    #[must_use]
    pub fn from_definition_name(name: &str) -> Self {
        Self(format!("warp_{name}"))
    }

    /// The id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed endpoint definition, before it becomes part of a pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointDefinition {
    /// Identity of the endpoint
    pub id: EndpointId,
    /// Host name or IP address
    pub host: String,
    /// Port
    pub port: u16,
}

impl EndpointDefinition {
    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A pooled proxy endpoint together with its health and load record.
///
/// Invariants maintained by the [`ProxyPool`](crate::ProxyPool):
/// `concurrent_requests ≤ max_concurrent`, and the failure counter only
/// moves back towards zero through successful probes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEndpoint {
    pub(crate) id: EndpointId,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) protocol: Protocol,
    pub(crate) healthy: bool,
    pub(crate) concurrent_requests: usize,
    pub(crate) max_concurrent: usize,
    pub(crate) success_count: u64,
    pub(crate) error_count: u64,
    pub(crate) response_time: Option<Duration>,
    pub(crate) last_used: Option<Instant>,
    pub(crate) last_checked: Option<Instant>,
    pub(crate) last_error: Option<String>,
}

impl ProxyEndpoint {
    /// Create a healthy, idle endpoint without history
    #[must_use]
    pub fn new(definition: EndpointDefinition, protocol: Protocol, max_concurrent: usize) -> Self {
        Self {
            id: definition.id,
            host: definition.host,
            port: definition.port,
            protocol,
            healthy: true,
            concurrent_requests: 0,
            max_concurrent,
            success_count: 0,
            error_count: 0,
            response_time: None,
            last_used: None,
            last_checked: None,
            last_error: None,
        }
    }

    /// Identity
    #[must_use]
    pub const fn id(&self) -> &EndpointId {
        &self.id
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL, e.g. `socks5://engage.cloudflareclient.com:2408`
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Whether the endpoint is eligible for selection at all
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Number of outstanding leases
    #[must_use]
    pub const fn concurrent_requests(&self) -> usize {
        self.concurrent_requests
    }

    /// Maximum number of simultaneous leases
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Whether another lease fits under the concurrency ceiling
    #[must_use]
    pub const fn has_capacity(&self) -> bool {
        self.concurrent_requests < self.max_concurrent
    }

    /// Successful probes and releases
    #[must_use]
    pub const fn success_count(&self) -> u64 {
        self.success_count
    }

    /// Failed probes and releases, decayed by successful probes
    #[must_use]
    pub const fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Duration of the last probe
    #[must_use]
    pub const fn response_time(&self) -> Option<Duration> {
        self.response_time
    }

    /// Reason of the last failure, if any
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// When the endpoint was last handed out
    #[must_use]
    pub const fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    /// When the endpoint was last probed
    #[must_use]
    pub const fn last_checked(&self) -> Option<Instant> {
        self.last_checked
    }

    /// Share of successes among all recorded outcomes, `1.0` without history
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.success_count as f64 / total as f64;
        rate
    }

    /// Composite ranking in `[0, 1]`.
    ///
    /// Starts from the success rate, scaled down linearly once the last
    /// response time exceeds five seconds (never below a factor of 0.1),
    /// and reduced to a tenth when the endpoint is at its concurrency
    /// ceiling. Unhealthy endpoints score zero.
    #[must_use]
    pub fn health_score(&self) -> f64 {
        if !self.healthy {
            return 0.0;
        }

        let mut score = self.success_rate();
        if let Some(response_time) = self.response_time
            && response_time > SLOW_RESPONSE
        {
            let excess = (response_time - SLOW_RESPONSE).as_secs_f64();
            score *= (1.0 - excess / SLOW_RESPONSE_SPAN_SECS).max(MIN_LATENCY_FACTOR);
        }
        if !self.has_capacity() {
            score *= AT_CAPACITY_FACTOR;
        }
        score.clamp(0.0, 1.0)
    }
}

impl Serialize for ProxyEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::stats::EndpointStats::from(self).serialize(serializer)
    }
}
