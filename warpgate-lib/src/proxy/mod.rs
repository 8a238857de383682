//! Health-checked pool of proxy endpoints.
//!
//! # Architecture
//!
//! - [`EndpointSource`]: provider of raw endpoint definitions, e.g. a [`ConfigDir`]
//! - [`ProxyEndpoint`]: a pooled endpoint with its health and load record
//! - [`ProxyPool`]: picks and leases the best endpoint, tracks outcomes
//! - [`Prober`]: reachability check driven by the pool's probe cycle
//! - [`PoolStats`]: read-only view for reporting

mod config;
mod endpoint;
mod loader;
mod pool;
mod probe;
mod stats;

pub use config::{
    DEFAULT_CONFIG_DIR, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_ENDPOINTS,
    DEFAULT_PER_ENDPOINT_CONCURRENCY, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_PROBE_URL, PoolConfig, Protocol,
};
pub use endpoint::{EndpointDefinition, EndpointId, ProxyEndpoint};
pub use loader::{
    ConfigDir, ConfigParseError, DEFAULT_ENDPOINT_HOST, DEFAULT_ENDPOINT_PORT, EndpointSource,
    InMemorySource, RawEndpointConfig, load_definitions,
};
pub use pool::{ProbeReport, ProxyPool};
pub use probe::{HttpProber, ProbeFailure, Prober};
pub use stats::{EndpointStats, PoolStats};
