use serde::Serialize;

use super::endpoint::{EndpointId, ProxyEndpoint};

/// Read-only view of one pooled endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Identity
    pub id: EndpointId,
    /// Proxy URL
    pub url: String,
    /// Whether the endpoint is eligible for selection
    pub healthy: bool,
    /// Outstanding leases
    pub concurrent_requests: usize,
    /// Lease ceiling
    pub max_concurrent: usize,
    /// Recorded successes
    pub success_count: u64,
    /// Recorded failures
    pub error_count: u64,
    /// Success rate in percent
    pub success_rate: f64,
    /// Composite health score
    pub health_score: f64,
    /// Duration of the last probe in seconds
    pub response_time_secs: Option<f64>,
    /// Reason of the last failure
    pub last_error: Option<String>,
}

impl From<&ProxyEndpoint> for EndpointStats {
    fn from(endpoint: &ProxyEndpoint) -> Self {
        Self {
            id: endpoint.id().clone(),
            url: endpoint.url(),
            healthy: endpoint.is_healthy(),
            concurrent_requests: endpoint.concurrent_requests(),
            max_concurrent: endpoint.max_concurrent(),
            success_count: endpoint.success_count(),
            error_count: endpoint.error_count(),
            success_rate: round(endpoint.success_rate() * 100.0, 1),
            health_score: round(endpoint.health_score(), 3),
            response_time_secs: endpoint
                .response_time()
                .map(|rt| round(rt.as_secs_f64(), 2)),
            last_error: endpoint.last_error().map(ToString::to_string),
        }
    }
}

/// Aggregate view of a [`ProxyPool`](crate::ProxyPool)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Pooled endpoints
    pub total: usize,
    /// Endpoints eligible for selection
    pub healthy: usize,
    /// Outstanding leases across the pool
    pub in_flight: usize,
    /// Mean of the last probe durations in seconds, over probed endpoints
    pub average_response_time: f64,
    /// Mean success rate in percent
    pub average_success_rate: f64,
    /// Per-endpoint details, ordered by id
    pub endpoints: Vec<EndpointStats>,
}

impl PoolStats {
    pub(crate) fn collect<'a>(endpoints: impl Iterator<Item = &'a ProxyEndpoint>) -> Self {
        let endpoints: Vec<EndpointStats> = endpoints.map(EndpointStats::from).collect();
        if endpoints.is_empty() {
            return Self::default();
        }

        let response_times: Vec<f64> = endpoints
            .iter()
            .filter_map(|e| e.response_time_secs)
            .collect();
        let rates: Vec<f64> = endpoints.iter().map(|e| e.success_rate).collect();

        Self {
            total: endpoints.len(),
            healthy: endpoints.iter().filter(|e| e.healthy).count(),
            in_flight: endpoints.iter().map(|e| e.concurrent_requests).sum(),
            average_response_time: round(mean(&response_times), 2),
            average_success_rate: round(mean(&rates), 1),
            endpoints,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    mean
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::config::Protocol;
    use crate::proxy::endpoint::EndpointDefinition;
    use std::time::Duration;

    fn endpoint(name: &str) -> ProxyEndpoint {
        ProxyEndpoint::new(
            EndpointDefinition {
                id: EndpointId::from_definition_name(name),
                host: "127.0.0.1".to_string(),
                port: 40000,
            },
            Protocol::Socks5,
            4,
        )
    }

    #[test]
    fn test_empty_pool_stats() {
        let stats = PoolStats::collect(std::iter::empty());
        assert_eq!(stats, PoolStats::default());
    }

    #[test]
    fn test_aggregates() {
        let mut a = endpoint("a");
        a.success_count = 1;
        a.error_count = 1;
        a.response_time = Some(Duration::from_millis(1500));
        a.concurrent_requests = 2;
        let mut b = endpoint("b");
        b.healthy = false;
        b.error_count = 5;
        let c = endpoint("c");

        let stats = PoolStats::collect([&a, &b, &c].into_iter());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.healthy, 2);
        assert_eq!(stats.in_flight, 2);
        // Only `a` has been probed
        assert!((stats.average_response_time - 1.5).abs() < f64::EPSILON);
        assert!((stats.average_success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.endpoints[1].last_error, None);
        assert!(!stats.endpoints[1].healthy);
    }
}
