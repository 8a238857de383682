use crate::verbosity::Verbosity;
use anyhow::{Context, Result};
use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Args, Parser, Subcommand};
use const_format::{concatcp, formatcp};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};
use strum::{Display, EnumIter, EnumString, VariantNames};
use url::Url;
use warpgate_lib::extract::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use warpgate_lib::proxy::{
    DEFAULT_CONFIG_DIR, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_ENDPOINTS,
    DEFAULT_PER_ENDPOINT_CONCURRENCY, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_PROBE_URL, Protocol,
};
use warpgate_lib::{
    AccountTier, AdmissionConfig, ExtractorBuilder, PoolConfig, TierLimits,
    admission::{
        DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_POLL_INTERVAL,
        DEFAULT_REQUEST_TIMEOUT,
    },
};

pub(crate) const WARPGATE_CONFIG_FILE: &str = "warpgate.toml";

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned values
const MAX_QUEUE_SIZE_STR: &str = concatcp!(DEFAULT_MAX_QUEUE_SIZE);
const REQUEST_TIMEOUT_STR: &str = concatcp!(DEFAULT_REQUEST_TIMEOUT.as_secs(), "s");
const CLEANUP_INTERVAL_STR: &str = concatcp!(DEFAULT_CLEANUP_INTERVAL.as_secs(), "s");
const POLL_INTERVAL_STR: &str = concatcp!(DEFAULT_POLL_INTERVAL.as_millis(), "ms");
const MAX_ENDPOINTS_STR: &str = concatcp!(DEFAULT_MAX_ENDPOINTS);
const PER_ENDPOINT_CONCURRENCY_STR: &str = concatcp!(DEFAULT_PER_ENDPOINT_CONCURRENCY);
const FAILURE_THRESHOLD_STR: &str = concatcp!(DEFAULT_FAILURE_THRESHOLD);
const PROBE_INTERVAL_STR: &str = concatcp!(DEFAULT_PROBE_INTERVAL.as_secs(), "s");
const PROBE_TIMEOUT_STR: &str = concatcp!(DEFAULT_PROBE_TIMEOUT.as_secs(), "s");
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT.as_secs(), "s");
const MAX_REDIRECTS_STR: &str = concatcp!(DEFAULT_MAX_REDIRECTS);
// Shows the default file name while still telling apart an explicit
// `--config` from none at all
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    WARPGATE_CONFIG_FILE,
);

/// The format to use for everything printed to stdout
#[derive(
    Debug, Deserialize, Default, Clone, Copy, Display, EnumIter, EnumString, VariantNames, PartialEq, Eq,
)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    #[default]
    Compact,
    Json,
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    max_queue_size: usize = DEFAULT_MAX_QUEUE_SIZE;
    request_timeout: Duration = DEFAULT_REQUEST_TIMEOUT;
    cleanup_interval: Duration = DEFAULT_CLEANUP_INTERVAL;
    poll_interval: Duration = DEFAULT_POLL_INTERVAL;
    config_dir: PathBuf = PathBuf::from(DEFAULT_CONFIG_DIR);
    max_endpoints: usize = DEFAULT_MAX_ENDPOINTS;
    per_endpoint_concurrency: usize = DEFAULT_PER_ENDPOINT_CONCURRENCY;
    failure_threshold: u64 = DEFAULT_FAILURE_THRESHOLD;
    probe_interval: Duration = DEFAULT_PROBE_INTERVAL;
    probe_timeout: Duration = DEFAULT_PROBE_TIMEOUT;
    probe_url: Url = PoolConfig::default().probe_url;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    timeout: Duration = DEFAULT_TIMEOUT;
    max_redirects: usize = DEFAULT_MAX_REDIRECTS;
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct WarpgateOptions {
    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,

    #[command(subcommand)]
    pub(crate) command: Command,
}

/// What to do once the services are configured
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Run each URL through admission control and the proxy pool
    Extract(ExtractArgs),
    /// Load the endpoint pool, probe every endpoint once and print pool statistics
    Probe,
    /// Print the limits of every account tier
    Tiers,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ExtractArgs {
    /// Targets to extract, processed concurrently
    #[arg(required = true, value_name = "URLS")]
    pub(crate) urls: Vec<Url>,

    /// Queue priority of these requests; higher is admitted first
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub(crate) priority: i32,

    /// Connect directly instead of leasing a proxy endpoint
    #[arg(long)]
    pub(crate) no_proxy: bool,

    /// Print the admission status (and pool statistics, if proxied) after all requests finished
    #[arg(long)]
    pub(crate) status: bool,
}

/// The main configuration for warpgate
#[derive(Parser, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Output format
    #[arg(
        short,
        long,
        global = true,
        default_value_t = OutputFormat::default(),
        value_parser = PossibleValuesParser::new(OutputFormat::VARIANTS)
            .map(|s| s.parse::<OutputFormat>().unwrap_or_default())
    )]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(short = 'T', long)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,

    /// Account tier whose connector limits apply
    #[arg(
        long,
        default_value_t = AccountTier::default(),
        value_parser = PossibleValuesParser::new(AccountTier::VARIANTS)
            .map(|s| s.parse::<AccountTier>().unwrap_or_default())
    )]
    #[serde(default)]
    pub(crate) tier: AccountTier,

    /// Explicit limits replacing the tier preset.
    /// Only available in the configuration file.
    #[arg(skip)]
    #[serde(default)]
    pub(crate) limits: Option<TierLimits>,

    /// Maximum number of requests waiting for a free slot
    #[arg(long, default_value = &MAX_QUEUE_SIZE_STR)]
    #[serde(default = "max_queue_size")]
    pub(crate) max_queue_size: usize,

    /// Time after which a waiting or running request is given up
    #[arg(long, value_parser = humantime::parse_duration, default_value = &REQUEST_TIMEOUT_STR)]
    #[serde(default = "request_timeout", with = "humantime_serde")]
    pub(crate) request_timeout: Duration,

    /// Interval of the sweep reclaiming expired requests
    #[arg(long, value_parser = humantime::parse_duration, default_value = &CLEANUP_INTERVAL_STR)]
    #[serde(default = "cleanup_interval", with = "humantime_serde")]
    pub(crate) cleanup_interval: Duration,

    /// Interval at which a waiting request re-checks its queue position
    #[arg(long, value_parser = humantime::parse_duration, default_value = &POLL_INTERVAL_STR)]
    #[serde(default = "poll_interval", with = "humantime_serde")]
    pub(crate) poll_interval: Duration,

    /// Directory holding one WireGuard `*.conf` file per endpoint
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    #[serde(default = "config_dir")]
    pub(crate) config_dir: PathBuf,

    /// Maximum number of endpoints kept in the pool
    #[arg(long, default_value = &MAX_ENDPOINTS_STR)]
    #[serde(default = "max_endpoints")]
    pub(crate) max_endpoints: usize,

    /// Maximum number of simultaneous requests through one endpoint
    #[arg(long, default_value = &PER_ENDPOINT_CONCURRENCY_STR)]
    #[serde(default = "per_endpoint_concurrency")]
    pub(crate) per_endpoint_concurrency: usize,

    /// Proxy scheme used to reach the endpoints
    #[arg(
        long,
        default_value_t = Protocol::default(),
        value_parser = PossibleValuesParser::new(Protocol::VARIANTS)
            .map(|s| s.parse::<Protocol>().unwrap_or_default())
    )]
    #[serde(default)]
    pub(crate) protocol: Protocol,

    /// Number of failures after which an endpoint is taken out of rotation
    #[arg(long, default_value = &FAILURE_THRESHOLD_STR)]
    #[serde(default = "failure_threshold")]
    pub(crate) failure_threshold: u64,

    /// Interval between two health probe cycles
    #[arg(long, value_parser = humantime::parse_duration, default_value = &PROBE_INTERVAL_STR)]
    #[serde(default = "probe_interval", with = "humantime_serde")]
    pub(crate) probe_interval: Duration,

    /// Upper bound of a single health probe
    #[arg(long, value_parser = humantime::parse_duration, default_value = &PROBE_TIMEOUT_STR)]
    #[serde(default = "probe_timeout", with = "humantime_serde")]
    pub(crate) probe_timeout: Duration,

    /// URL fetched through each endpoint by the health probe
    #[arg(long, default_value = DEFAULT_PROBE_URL)]
    #[serde(default = "probe_url")]
    pub(crate) probe_url: Url,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Timeout of a single extraction, from connect to response finished
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout", with = "humantime_serde")]
    pub(crate) timeout: Duration,

    /// Maximum number of allowed redirects
    #[arg(short, long, default_value = &MAX_REDIRECTS_STR)]
    #[serde(default = "max_redirects")]
    pub(crate) max_redirects: usize,

    /// Proceed for server connections considered insecure (invalid TLS)
    #[arg(short, long)]
    #[serde(default)]
    pub(crate) insecure: bool,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        // Read configuration file
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // Explicit limits are only available in TOML, a table doesn't map
        // well to a single flag
        if toml.limits.is_some() {
            self.limits = toml.limits;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..limits,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                format: OutputFormat::default(),
                threads: None,
                tier: AccountTier::default(),
                max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
                poll_interval: DEFAULT_POLL_INTERVAL,
                config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
                max_endpoints: DEFAULT_MAX_ENDPOINTS,
                per_endpoint_concurrency: DEFAULT_PER_ENDPOINT_CONCURRENCY,
                protocol: Protocol::default(),
                failure_threshold: DEFAULT_FAILURE_THRESHOLD,
                probe_interval: DEFAULT_PROBE_INTERVAL,
                probe_timeout: DEFAULT_PROBE_TIMEOUT,
                probe_url: probe_url(),
                user_agent: DEFAULT_USER_AGENT,
                timeout: DEFAULT_TIMEOUT,
                max_redirects: DEFAULT_MAX_REDIRECTS,
                insecure: false,
            }
        }
    }

    /// Settings of the admission controller
    pub(crate) fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            tier: self.tier,
            limits: self.limits,
            max_queue_size: self.max_queue_size,
            request_timeout: self.request_timeout,
            cleanup_interval: self.cleanup_interval,
            poll_interval: self.poll_interval,
        }
    }

    /// Settings of the proxy pool
    pub(crate) fn pool(&self) -> PoolConfig {
        PoolConfig {
            config_dir: self.config_dir.clone(),
            max_endpoints: self.max_endpoints,
            per_endpoint_concurrency: self.per_endpoint_concurrency,
            protocol: self.protocol,
            failure_threshold: self.failure_threshold,
            probe_interval: self.probe_interval,
            probe_timeout: self.probe_timeout,
            probe_url: self.probe_url.clone(),
        }
    }

    /// Settings of the HTTP extractor
    pub(crate) fn extractor(&self) -> ExtractorBuilder {
        ExtractorBuilder::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .max_redirects(self.max_redirects)
            .allow_insecure(self.insecure)
            .build()
    }
}
