use std::hash::Hash;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::extract::ExtractionError;

/// Possible errors when interacting with `warpgate_lib`
///
/// Only four conditions are surfaced by the admission and proxy layers:
/// [`ErrorKind::RateLimited`], [`ErrorKind::QueueFull`],
/// [`ErrorKind::AdmissionTimeout`] and [`ErrorKind::NoHealthyProxy`].
/// Transient internal problems (a failed probe, a malformed endpoint
/// definition) are handled where they occur and never end up here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The token bucket had no token left for this request
    #[error("Request rejected: rate limit of the connector budget reached")]
    RateLimited,
    /// The wait queue already holds its configured maximum number of tickets
    #[error("Request rejected: wait queue is full ({0} tickets)")]
    QueueFull(usize),
    /// The ticket was not promoted to running before its deadline
    #[error("No admission slot became available within {0:?}")]
    AdmissionTimeout(Duration),
    /// The proxy pool has no healthy endpoint with spare capacity
    #[error("No healthy proxy endpoint with spare capacity available")]
    NoHealthyProxy,
    /// The extraction collaborator failed for an admitted request
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// The request client could not be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),
    /// A proxy URL could not be handed to the request client
    #[error("Invalid proxy URL `{0}`: {1}")]
    InvalidProxyUrl(String, #[source] reqwest::Error),
    /// The endpoint definition source could not be read at all
    #[error("Cannot read endpoint definitions from `{0}`: {1}")]
    ReadEndpointSource(String, #[source] std::io::Error),
}

impl ErrorKind {
    /// Return `true` if the error stems from running out of a shared
    /// resource (rate, queue, permits or proxies) rather than from the
    /// request itself.
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::QueueFull(_) | Self::AdmissionTimeout(_) | Self::NoHealthyProxy
        )
    }

    /// Short machine-readable name, used in logs and serialized output
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QueueFull(_) => "queue_full",
            Self::AdmissionTimeout(_) => "admission_timeout",
            Self::NoHealthyProxy => "no_healthy_proxy",
            Self::Extraction(_) => "extraction",
            Self::BuildRequestClient(_) => "build_request_client",
            Self::InvalidProxyUrl(..) => "invalid_proxy_url",
            Self::ReadEndpointSource(..) => "read_endpoint_source",
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::QueueFull(a), Self::QueueFull(b)) => a == b,
            (Self::AdmissionTimeout(a), Self::AdmissionTimeout(b)) => a == b,
            (Self::Extraction(a), Self::Extraction(b)) => a == b,
            (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (Self::InvalidProxyUrl(u1, _), Self::InvalidProxyUrl(u2, _)) => u1 == u2,
            (Self::ReadEndpointSource(p1, e1), Self::ReadEndpointSource(p2, e2)) => {
                p1 == p2 && e1.kind() == e2.kind()
            }
            (Self::RateLimited, Self::RateLimited) | (Self::NoHealthyProxy, Self::NoHealthyProxy) => {
                true
            }
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.code().hash(state);
        match self {
            Self::QueueFull(n) => n.hash(state),
            Self::AdmissionTimeout(d) => d.hash(state),
            Self::InvalidProxyUrl(u, _) | Self::ReadEndpointSource(u, _) => u.hash(state),
            Self::Extraction(e) => e.to_string().hash(state),
            _ => {}
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
