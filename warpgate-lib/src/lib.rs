//! `warpgate` gates outbound extraction requests behind a hard concurrency
//! and rate ceiling, and routes them through a small, health-checked pool
//! of proxy endpoints.
//!
//! The two resources are independent. A caller asks the
//! [`AdmissionController`] for a permit, leases the best endpoint from the
//! [`ProxyPool`], performs its request and releases both:
//!
//! ```
//! use warpgate_lib::{
//!     AdmissionConfig, AdmissionController, EndpointId, PoolConfig, ProxyPool, RawEndpointConfig,
//!     RequestMeta, Result,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let admission = AdmissionController::new(AdmissionConfig::default());
//! let pool = ProxyPool::new(
//!     PoolConfig::default(),
//!     vec![RawEndpointConfig::new("wg0", "Endpoint = 162.159.192.1:2408").parse().unwrap()],
//! );
//!
//! let ticket = admission.acquire(RequestMeta::for_target("dQw4w9WgXcQ"), 0).await?;
//! let endpoint = pool.best().expect("the pool has a fresh endpoint");
//! assert_eq!(endpoint.url(), "socks5://162.159.192.1:2408");
//!
//! // ... perform the request through `endpoint.url()` ...
//!
//! pool.release(endpoint.id(), true);
//! admission.release(ticket, true);
//! # Ok(())
//! # }
//! ```
//!
//! For the common case, a [`Gateway`] sequences these steps around an
//! [`Extractor`], and [`Services`] owns both components together with
//! their background tasks.
// #![deny(missing_docs)]

mod gateway;
mod services;
mod task;
mod types;

pub mod admission;
pub mod extract;
pub mod proxy;

pub use admission::{
    AccountTier, Admission, AdmissionConfig, AdmissionController, AdmissionStats,
    AdmissionStatus, RequestMeta, Ticket, TicketId, TierLimits, TokenBucket,
};
pub use extract::{ExtractionError, Extractor, ExtractorBuilder, HttpExtractor, VideoInfo};
pub use gateway::{Extraction, Gateway};
pub use proxy::{
    ConfigDir, EndpointDefinition, EndpointId, EndpointSource, HttpProber, InMemorySource,
    PoolConfig, PoolStats, Prober, ProxyEndpoint, ProxyPool, RawEndpointConfig,
};
pub use services::Services;
pub use task::BackgroundTask;
pub use types::*;
