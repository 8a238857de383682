use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, VariantNames};

/// Default maximum number of tickets waiting for a permit
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

/// Default total lifetime of a ticket, waiting plus running
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Default interval of the expired-ticket sweep
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval at which a waiting caller re-checks its ticket
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upstream account tier. Each tier maps to a fixed set of connector
/// and rate ceilings, see [`AccountTier::limits`].
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
    EnumIter,
    EnumString,
    VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AccountTier {
    /// Conservative preset for free accounts, leaving headroom below the
    /// published connector quota
    #[default]
    Free,
    /// Paid standard account
    Standard,
    /// Enterprise account
    Enterprise,
}

impl AccountTier {
    /// Numeric ceilings for this tier
    #[must_use]
    pub const fn limits(self) -> TierLimits {
        match self {
            AccountTier::Free => TierLimits {
                connectors: 8,
                per_connector_limit: 4,
                rate_per_second: 2.5,
                burst_limit: 8,
                connection_timeout: Duration::from_secs(25),
            },
            AccountTier::Standard => TierLimits {
                connectors: 10,
                per_connector_limit: 6,
                rate_per_second: 5.0,
                burst_limit: 15,
                connection_timeout: Duration::from_secs(30),
            },
            AccountTier::Enterprise => TierLimits {
                connectors: 20,
                per_connector_limit: 10,
                rate_per_second: 10.0,
                burst_limit: 25,
                connection_timeout: Duration::from_secs(30),
            },
        }
    }
}

/// Connector and rate ceilings imposed by the upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Number of connectors available to this account
    pub connectors: usize,
    /// Concurrent requests allowed per connector
    pub per_connector_limit: usize,
    /// Token bucket refill rate
    pub rate_per_second: f64,
    /// Token bucket capacity
    pub burst_limit: u32,
    /// Upper bound for establishing a connection through a connector
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl TierLimits {
    /// Size of the concurrency budget: `connectors × per_connector_limit`
    #[must_use]
    pub const fn total_permits(&self) -> usize {
        self.connectors * self.per_connector_limit
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        AccountTier::default().limits()
    }
}

/// Configuration of an [`AdmissionController`](crate::AdmissionController)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Tier preset providing the numeric ceilings
    #[serde(default)]
    pub tier: AccountTier,

    /// Explicit ceilings, overriding the tier preset when set
    #[serde(default)]
    pub limits: Option<TierLimits>,

    /// Maximum number of queued tickets
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Total time a ticket may live, including time spent queued
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Interval of the periodic expired-ticket sweep
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Upper bound between two checks of a waiting ticket
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            tier: AccountTier::default(),
            limits: None,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

const fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

const fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

const fn default_cleanup_interval() -> Duration {
    DEFAULT_CLEANUP_INTERVAL
}

const fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl AdmissionConfig {
    /// Create a config for the given tier with all other values at their defaults
    #[must_use]
    pub fn for_tier(tier: AccountTier) -> Self {
        Self {
            tier,
            ..Self::default()
        }
    }

    /// The ceilings in effect: explicit limits if given, else the tier preset
    #[must_use]
    pub fn effective_limits(&self) -> TierLimits {
        self.limits.unwrap_or_else(|| self.tier.limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(AccountTier::Free, 32, 8)]
    #[case(AccountTier::Standard, 60, 15)]
    #[case(AccountTier::Enterprise, 200, 25)]
    fn test_tier_presets(#[case] tier: AccountTier, #[case] permits: usize, #[case] burst: u32) {
        let limits = tier.limits();
        assert_eq!(limits.total_permits(), permits);
        assert_eq!(limits.burst_limit, burst);
    }

    #[test]
    fn test_free_tier_rate() {
        let limits = AccountTier::Free.limits();
        assert!((limits.rate_per_second - 2.5).abs() < f64::EPSILON);
        assert_eq!(limits.connection_timeout, Duration::from_secs(25));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!(AccountTier::from_str("free").unwrap(), AccountTier::Free);
        assert_eq!(
            AccountTier::from_str("Enterprise").unwrap(),
            AccountTier::Enterprise
        );
        assert!(AccountTier::from_str("platinum").is_err());
        assert_eq!(AccountTier::Standard.to_string(), "standard");
    }

    #[test]
    fn test_default_admission_config() {
        let config = AdmissionConfig::default();
        assert_eq!(config.tier, AccountTier::Free);
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.cleanup_interval, Duration::from_secs(30));
        assert_eq!(config.effective_limits(), AccountTier::Free.limits());
    }

    #[test]
    fn test_limits_override_tier() {
        let limits = TierLimits {
            connectors: 1,
            per_connector_limit: 2,
            rate_per_second: 1.0,
            burst_limit: 3,
            connection_timeout: Duration::from_secs(5),
        };
        let config = AdmissionConfig {
            limits: Some(limits),
            ..AdmissionConfig::for_tier(AccountTier::Enterprise)
        };
        assert_eq!(config.effective_limits().total_permits(), 2);
    }

    #[test]
    fn test_config_deserialization() {
        let config: AdmissionConfig = toml::from_str(
            r#"
            tier = "standard"
            max_queue_size = 10
            request_timeout = "20s"
            "#,
        )
        .unwrap();

        assert_eq!(config.tier, AccountTier::Standard);
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }
}
