use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use strum::{Display, EnumString, VariantNames};
use url::Url;

/// Default directory scanned for `*.conf` endpoint definitions
pub const DEFAULT_CONFIG_DIR: &str = "warp-configs";

/// Default upper bound of pooled endpoints, matching the upstream quota
pub const DEFAULT_MAX_ENDPOINTS: usize = 8;

/// Default number of simultaneous leases per endpoint
pub const DEFAULT_PER_ENDPOINT_CONCURRENCY: usize = 4;

/// Default number of accumulated failures after which an endpoint is
/// considered unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;

/// Default interval between two probe cycles
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(300);

/// Default upper bound of a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default URL fetched through each endpoint when probing
pub const DEFAULT_PROBE_URL: &str = "https://www.youtube.com";

static DEFAULT_PROBE_URL_PARSED: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_PROBE_URL).expect("default probe URL is valid"));

/// Scheme used to reach pooled endpoints
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    /// SOCKS5, resolving names locally
    #[default]
    Socks5,
    /// SOCKS5, resolving names on the proxy
    Socks5h,
    /// Plain HTTP proxy
    Http,
}

/// Configuration of a [`ProxyPool`](crate::ProxyPool)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoolConfig {
    /// Directory holding the endpoint definitions
    pub config_dir: PathBuf,

    /// Maximum number of endpoints kept in the pool
    pub max_endpoints: usize,

    /// Maximum simultaneous leases per endpoint
    pub per_endpoint_concurrency: usize,

    /// Scheme used to build endpoint proxy URLs
    pub protocol: Protocol,

    /// Accumulated failures that mark an endpoint unhealthy, shared by the
    /// probe and release paths
    pub failure_threshold: u64,

    /// Interval between two probe cycles
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Upper bound of a single probe, including connection setup
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// URL fetched through an endpoint to check its reachability
    pub probe_url: Url,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
            per_endpoint_concurrency: DEFAULT_PER_ENDPOINT_CONCURRENCY,
            protocol: Protocol::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_url: DEFAULT_PROBE_URL_PARSED.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.config_dir, PathBuf::from("warp-configs"));
        assert_eq!(config.max_endpoints, 8);
        assert_eq!(config.per_endpoint_concurrency, 4);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.probe_interval, Duration::from_secs(300));
        assert_eq!(config.probe_url.as_str(), "https://www.youtube.com/");
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!(Protocol::from_str("SOCKS5").unwrap(), Protocol::Socks5);
        assert_eq!(Protocol::Socks5h.to_string(), "socks5h");
        assert!(Protocol::from_str("ftp").is_err());
    }

    #[test]
    fn test_partial_deserialization() {
        let config: PoolConfig = toml::from_str(
            r#"
            config_dir = "/etc/warp"
            probe_timeout = "3s"
            protocol = "http"
            "#,
        )
        .unwrap();
        assert_eq!(config.config_dir, PathBuf::from("/etc/warp"));
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.max_endpoints, DEFAULT_MAX_ENDPOINTS);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<PoolConfig, _> = toml::from_str("max_proxies = 3");
        assert!(result.is_err());
    }
}
