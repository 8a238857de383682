use async_trait::async_trait;
use reqwest::{Client, Proxy, redirect};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::endpoint::ProxyEndpoint;

/// Why a health probe failed.
///
/// Only ever recorded on the endpoint; never returned to callers of the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The probe did not finish in time
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// No client could be set up for the endpoint
    #[error("cannot use proxy: {0}")]
    Setup(String),
    /// The request through the endpoint failed
    #[error("request failed: {0}")]
    Request(String),
    /// The probe target answered with an unexpected status
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Reachability check for a single endpoint
#[async_trait]
pub trait Prober: Send + Sync + Debug {
    /// Check whether `endpoint` is usable right now
    ///
    /// # Errors
    ///
    /// Returns the reason the endpoint is deemed unreachable.
    async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProbeFailure>;
}

/// Probe an endpoint by fetching a well-known URL through it
#[derive(Debug, Clone)]
pub struct HttpProber {
    probe_url: Url,
    timeout: Duration,
}

impl HttpProber {
    /// Fetch `probe_url` through each endpoint, giving up after `timeout`
    #[must_use]
    pub const fn new(probe_url: Url, timeout: Duration) -> Self {
        Self { probe_url, timeout }
    }

    fn client_for(&self, endpoint: &ProxyEndpoint) -> Result<Client, ProbeFailure> {
        let proxy = Proxy::all(endpoint.url()).map_err(|e| ProbeFailure::Setup(e.to_string()))?;
        Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .redirect(redirect::Policy::limited(5))
            .build()
            .map_err(|e| ProbeFailure::Setup(e.to_string()))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &ProxyEndpoint) -> Result<(), ProbeFailure> {
        let client = self.client_for(endpoint)?;
        let response = client
            .get(self.probe_url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeFailure::Timeout(self.timeout)
                } else {
                    ProbeFailure::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(status.as_u16()))
        }
    }
}
