use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::admission::{Admission, AdmissionController, RequestMeta, TicketId};
use crate::extract::{Extractor, VideoInfo};
use crate::proxy::{EndpointId, ProxyPool};
use crate::{ErrorKind, Result};

/// A successful run through the [`Gateway`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// Ticket the request was admitted under
    pub ticket: TicketId,
    /// Whether the request had to wait in the queue
    pub queued: bool,
    /// Endpoint the request went through, if proxied
    pub endpoint: Option<EndpointId>,
    /// What the extractor reported
    pub info: VideoInfo,
}

/// Drives a request through admission, proxy selection and extraction.
///
/// The admission controller and the proxy pool stay independent; the
/// gateway only sequences them: admit, wait for a permit, lease an
/// endpoint, extract, then release both with the outcome.
#[derive(Debug, Clone)]
pub struct Gateway {
    admission: Arc<AdmissionController>,
    pool: Option<Arc<ProxyPool>>,
    extractor: Arc<dyn Extractor>,
}

impl Gateway {
    /// A gateway that extracts directly, without proxies
    #[must_use]
    pub fn new(admission: Arc<AdmissionController>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            admission,
            pool: None,
            extractor,
        }
    }

    /// Route every extraction through an endpoint of `pool`
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// The admission controller in use
    #[must_use]
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// The proxy pool in use, if any
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    /// Run one extraction.
    ///
    /// Both the admission permit and the endpoint lease are returned on
    /// every path, including when the returned future is dropped early
    /// (counted as a failure then).
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::RateLimited`], [`ErrorKind::QueueFull`] or
    ///   [`ErrorKind::AdmissionTimeout`] if the request is not admitted
    /// - [`ErrorKind::NoHealthyProxy`] if proxying is enabled and no
    ///   endpoint is available; the request fails right away
    /// - [`ErrorKind::Extraction`] if the extractor fails
    pub async fn extract(&self, target: &Url, priority: i32, meta: RequestMeta) -> Result<Extraction> {
        let admission = self.admission.try_acquire(meta, priority)?;
        let mut permit = PermitGuard::new(&self.admission, admission.id());
        if let Admission::Queued { id, .. } = admission {
            self.admission.await_slot(id, None).await?;
        }

        let mut lease = match &self.pool {
            Some(pool) => {
                let Some(endpoint) = pool.best() else {
                    warn!("Failing ticket {}: no healthy proxy", admission.id());
                    return Err(ErrorKind::NoHealthyProxy);
                };
                Some((LeaseGuard::new(pool, endpoint.id().clone()), endpoint.url()))
            }
            None => None,
        };

        let proxy = lease.as_ref().map(|(_, url)| url.as_str());
        debug!(
            "Ticket {} extracting {target} via {}",
            admission.id(),
            proxy.unwrap_or("direct connection")
        );
        let outcome = self.extractor.extract(target, proxy).await;
        let success = outcome.is_ok();

        let endpoint = lease.as_mut().map(|(guard, _)| guard.finish(success));
        permit.finish(success);

        let info = outcome?;
        info!("Ticket {} extracted {target}", admission.id());
        Ok(Extraction {
            ticket: admission.id(),
            queued: !admission.is_running(),
            endpoint,
            info,
        })
    }
}

/// Returns an admission permit exactly once
struct PermitGuard<'a> {
    controller: &'a AdmissionController,
    id: TicketId,
    released: bool,
}

impl<'a> PermitGuard<'a> {
    const fn new(controller: &'a AdmissionController, id: TicketId) -> Self {
        Self {
            controller,
            id,
            released: false,
        }
    }

    fn finish(&mut self, success: bool) {
        if !self.released {
            self.released = true;
            self.controller.release(self.id, success);
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.finish(false);
    }
}

/// Returns an endpoint lease exactly once
struct LeaseGuard<'a> {
    pool: &'a ProxyPool,
    id: EndpointId,
    released: bool,
}

impl<'a> LeaseGuard<'a> {
    const fn new(pool: &'a ProxyPool, id: EndpointId) -> Self {
        Self {
            pool,
            id,
            released: false,
        }
    }

    fn finish(&mut self, success: bool) -> EndpointId {
        if !self.released {
            self.released = true;
            self.pool.release(&self.id, success);
        }
        self.id.clone()
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionConfig, TierLimits};
    use crate::extract::ExtractionError;
    use crate::proxy::{EndpointDefinition, PoolConfig};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the proxies it was asked to use and fails on demand
    #[derive(Debug, Default)]
    struct RecordingExtractor {
        fail: bool,
        seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Extractor for RecordingExtractor {
        async fn extract(
            &self,
            target: &Url,
            proxy: Option<&str>,
        ) -> std::result::Result<VideoInfo, ExtractionError> {
            self.seen.lock().unwrap().push(proxy.map(ToString::to_string));
            if self.fail {
                return Err(ExtractionError::Status(500));
            }
            Ok(VideoInfo {
                target: target.clone(),
                final_url: target.clone(),
                status: 200,
                content_type: None,
                title: None,
                proxy: proxy.map(ToString::to_string),
            })
        }
    }

    fn admission(permits: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(AdmissionConfig {
            limits: Some(TierLimits {
                connectors: 1,
                per_connector_limit: permits,
                rate_per_second: 10.0,
                burst_limit: 10,
                connection_timeout: Duration::from_secs(5),
            }),
            ..AdmissionConfig::default()
        }))
    }

    fn pool(names: &[&str]) -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(
            PoolConfig::default(),
            names
                .iter()
                .map(|name| EndpointDefinition {
                    id: EndpointId::from(*name),
                    host: "127.0.0.1".to_string(),
                    port: 40000,
                })
                .collect(),
        ))
    }

    fn target() -> Url {
        Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap()
    }

    #[tokio::test]
    async fn test_direct_extraction_releases_permit() {
        let admission = admission(2);
        let extractor = Arc::new(RecordingExtractor::default());
        let gateway = Gateway::new(admission.clone(), extractor.clone());

        let extraction = gateway.extract(&target(), 0, RequestMeta::default()).await.unwrap();
        assert!(!extraction.queued);
        assert_eq!(extraction.endpoint, None);
        assert_eq!(admission.available_permits(), 2);
        assert_eq!(admission.status().statistics.successful_requests, 1);
        assert_eq!(*extractor.seen.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_proxied_extraction_releases_both() {
        let admission = admission(2);
        let pool = pool(&["a"]);
        let extractor = Arc::new(RecordingExtractor::default());
        let gateway = Gateway::new(admission.clone(), extractor.clone()).with_pool(pool.clone());

        let extraction = gateway.extract(&target(), 0, RequestMeta::default()).await.unwrap();
        let id = EndpointId::from("a");
        assert_eq!(extraction.endpoint, Some(id.clone()));
        assert_eq!(
            extraction.info.proxy.as_deref(),
            Some("socks5://127.0.0.1:40000")
        );

        let endpoint = pool.get(&id).unwrap();
        assert_eq!(endpoint.concurrent_requests(), 0);
        assert_eq!(endpoint.success_count(), 1);
        assert_eq!(admission.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_no_healthy_proxy_fails_fast() {
        let admission = admission(2);
        let gateway = Gateway::new(admission.clone(), Arc::new(RecordingExtractor::default()))
            .with_pool(pool(&[]));

        assert_eq!(
            gateway.extract(&target(), 0, RequestMeta::default()).await,
            Err(ErrorKind::NoHealthyProxy)
        );
        assert_eq!(admission.available_permits(), 2);
        assert_eq!(admission.status().statistics.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported_to_both() {
        let admission = admission(2);
        let pool = pool(&["a"]);
        let extractor = Arc::new(RecordingExtractor {
            fail: true,
            ..RecordingExtractor::default()
        });
        let gateway = Gateway::new(admission.clone(), extractor).with_pool(pool.clone());

        assert_eq!(
            gateway.extract(&target(), 0, RequestMeta::default()).await,
            Err(ErrorKind::Extraction(ExtractionError::Status(500)))
        );
        let endpoint = pool.get(&EndpointId::from("a")).unwrap();
        assert_eq!(endpoint.error_count(), 1);
        assert_eq!(endpoint.concurrent_requests(), 0);
        assert_eq!(admission.status().statistics.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_rejection_passes_through() {
        let admission = Arc::new(AdmissionController::new(AdmissionConfig {
            limits: Some(TierLimits {
                connectors: 1,
                per_connector_limit: 1,
                rate_per_second: 0.0,
                burst_limit: 0,
                connection_timeout: Duration::from_secs(5),
            }),
            ..AdmissionConfig::default()
        }));
        let gateway = Gateway::new(admission, Arc::new(RecordingExtractor::default()));

        assert_eq!(
            gateway.extract(&target(), 0, RequestMeta::default()).await,
            Err(ErrorKind::RateLimited)
        );
    }
}
