//! Reading endpoint definitions from an external source.
//!
//! Definitions use the WireGuard configuration format; only the
//! `Endpoint = host:port` line of the `[Peer]` section is of interest.

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use super::endpoint::{EndpointDefinition, EndpointId};
use crate::{ErrorKind, Result};

/// Host used when a definition carries no `Endpoint` line
pub const DEFAULT_ENDPOINT_HOST: &str = "engage.cloudflareclient.com";

/// Port used when a definition carries no `Endpoint` line
pub const DEFAULT_ENDPOINT_PORT: u16 = 2408;

/// File extension of endpoint definitions in a [`ConfigDir`]
const CONFIG_EXTENSION: &str = "conf";

static ENDPOINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*Endpoint[ \t]*=[ \t]*(?P<value>\S*)[ \t]*\r?$")
        .expect("endpoint regex is valid")
});

/// Why a single endpoint definition was rejected.
/// These never abort loading; the entry is skipped instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigParseError {
    /// The value has no `:port` suffix
    #[error("endpoint `{0}` has no port")]
    MissingPort(String),
    /// The port is not a number in `1..=65535`
    #[error("endpoint `{0}` has an invalid port")]
    InvalidPort(String),
    /// Nothing precedes the port
    #[error("endpoint `{0}` has an empty host")]
    EmptyHost(String),
}

/// A raw endpoint definition as handed out by an [`EndpointSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEndpointConfig {
    /// Name of the definition, e.g. the file stem
    pub name: String,
    /// Unparsed definition text
    pub content: String,
}

impl RawEndpointConfig {
    /// Create a raw definition
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Parse the definition.
    ///
    /// A definition without an `Endpoint` line falls back to
    /// [`DEFAULT_ENDPOINT_HOST`]:[`DEFAULT_ENDPOINT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigParseError`] if the `Endpoint` value is malformed.
    pub fn parse(&self) -> std::result::Result<EndpointDefinition, ConfigParseError> {
        let id = EndpointId::from_definition_name(&self.name);

        let Some(captures) = ENDPOINT_LINE.captures(&self.content) else {
            debug!(
                "Definition `{}` has no Endpoint line, using {DEFAULT_ENDPOINT_HOST}:{DEFAULT_ENDPOINT_PORT}",
                self.name
            );
            return Ok(EndpointDefinition {
                id,
                host: DEFAULT_ENDPOINT_HOST.to_string(),
                port: DEFAULT_ENDPOINT_PORT,
            });
        };

        let value = &captures["value"];
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| ConfigParseError::MissingPort(value.to_string()))?;
        let port: u16 = port
            .parse()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| ConfigParseError::InvalidPort(value.to_string()))?;
        if host.is_empty() {
            return Err(ConfigParseError::EmptyHost(value.to_string()));
        }

        Ok(EndpointDefinition {
            id,
            host: host.to_string(),
            port,
        })
    }
}

/// Provider of raw endpoint definitions.
///
/// Consumed once at pool construction and again whenever the pool is
/// reloaded.
#[async_trait]
pub trait EndpointSource: Send + Sync + Debug {
    /// List all raw definitions currently available
    ///
    /// # Errors
    ///
    /// Only fails if the source as a whole cannot be read. Individual
    /// unreadable entries are skipped.
    async fn list_endpoint_configs(&self) -> Result<Vec<RawEndpointConfig>>;
}

/// A directory of `*.conf` files, one endpoint per file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    path: PathBuf,
}

impl ConfigDir {
    /// Use the given directory
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The directory being read
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EndpointSource for ConfigDir {
    async fn list_endpoint_configs(&self) -> Result<Vec<RawEndpointConfig>> {
        let display = self.path.display().to_string();
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            warn!("Endpoint config directory `{display}` does not exist");
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| ErrorKind::ReadEndpointSource(display.clone(), e))?;

        let mut configs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(ErrorKind::ReadEndpointSource(display, e)),
            };
            let path = entry.path();
            if path.extension() != Some(OsStr::new(CONFIG_EXTENSION)) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!("Skipping endpoint config with non UTF-8 name: {}", path.display());
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => configs.push(RawEndpointConfig::new(name, content)),
                Err(e) => warn!("Skipping unreadable endpoint config {}: {e}", path.display()),
            }
        }

        if configs.is_empty() {
            warn!("No endpoint configs found in `{display}`");
        }
        Ok(configs)
    }
}

/// A fixed, in-memory set of definitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemorySource {
    configs: Vec<RawEndpointConfig>,
}

impl InMemorySource {
    /// Serve the given definitions
    #[must_use]
    pub const fn new(configs: Vec<RawEndpointConfig>) -> Self {
        Self { configs }
    }
}

impl FromIterator<RawEndpointConfig> for InMemorySource {
    fn from_iter<T: IntoIterator<Item = RawEndpointConfig>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl EndpointSource for InMemorySource {
    async fn list_endpoint_configs(&self) -> Result<Vec<RawEndpointConfig>> {
        Ok(self.configs.clone())
    }
}

/// Read and parse definitions from `source`.
///
/// Malformed entries are skipped with a warning. The remaining definitions
/// are ordered by name and capped at `max_endpoints`.
///
/// # Errors
///
/// Fails only if the source as a whole cannot be read.
pub async fn load_definitions(
    source: &dyn EndpointSource,
    max_endpoints: usize,
) -> Result<Vec<EndpointDefinition>> {
    let mut raw = source.list_endpoint_configs().await?;
    raw.sort_by(|a, b| a.name.cmp(&b.name));

    let mut definitions: Vec<EndpointDefinition> = raw
        .iter()
        .filter_map(|config| match config.parse() {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!("Skipping endpoint config `{}`: {e}", config.name);
                None
            }
        })
        .collect();
    definitions.dedup_by(|a, b| a.id == b.id);

    if definitions.len() > max_endpoints {
        warn!(
            "Found {} endpoint configs, only using the first {max_endpoints}",
            definitions.len()
        );
        definitions.truncate(max_endpoints);
    }

    info!("Loaded {} endpoint definitions", definitions.len());
    Ok(definitions)
}
