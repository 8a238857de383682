use log::info;
use std::sync::Arc;

use crate::admission::{AdmissionConfig, AdmissionController};
use crate::extract::Extractor;
use crate::gateway::Gateway;
use crate::proxy::{EndpointSource, PoolConfig, Prober, ProxyPool};
use crate::task::BackgroundTask;
use crate::Result;

/// The admission controller and proxy pool of one process, together with
/// their background tasks.
///
/// Construct once at startup with [`start`](Self::start), hand the
/// components to whoever needs them, and call
/// [`shutdown`](Self::shutdown) before exiting.
#[derive(Debug)]
pub struct Services {
    admission: Arc<AdmissionController>,
    pool: Arc<ProxyPool>,
    tasks: Vec<BackgroundTask>,
}

impl Services {
    /// Build both components and start the expired-ticket sweep and the
    /// proxy health probes. The first probe cycle starts right away.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint source as a whole cannot be read.
    pub async fn start(
        admission: AdmissionConfig,
        pool: PoolConfig,
        source: &dyn EndpointSource,
        prober: Arc<dyn Prober>,
    ) -> Result<Self> {
        let admission = Arc::new(AdmissionController::new(admission));
        let pool = Arc::new(ProxyPool::load(pool, source).await?);

        let tasks = vec![
            admission.spawn_cleanup(),
            pool.spawn_health_monitor(prober),
        ];
        info!("Services started");

        Ok(Self {
            admission,
            pool,
            tasks,
        })
    }

    /// Build both components without any background task.
    /// Expired tickets and endpoint health are then up to the caller.
    ///
    /// # Errors
    ///
    /// Fails only if the endpoint source as a whole cannot be read.
    pub async fn start_idle(
        admission: AdmissionConfig,
        pool: PoolConfig,
        source: &dyn EndpointSource,
    ) -> Result<Self> {
        Ok(Self {
            admission: Arc::new(AdmissionController::new(admission)),
            pool: Arc::new(ProxyPool::load(pool, source).await?),
            tasks: Vec::new(),
        })
    }

    /// The admission controller
    #[must_use]
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// The proxy pool
    #[must_use]
    pub const fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// A gateway over these components, routing through the pool if
    /// `use_proxy` is set
    #[must_use]
    pub fn gateway(&self, extractor: Arc<dyn Extractor>, use_proxy: bool) -> Gateway {
        let gateway = Gateway::new(Arc::clone(&self.admission), extractor);
        if use_proxy {
            gateway.with_pool(Arc::clone(&self.pool))
        } else {
            gateway
        }
    }

    /// Stop all background tasks and wait for them to finish.
    /// Queued and running tickets are discarded with the services.
    pub async fn shutdown(self) {
        for task in self.tasks {
            task.shutdown().await;
        }
        info!("Services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{InMemorySource, ProbeFailure, ProxyEndpoint, RawEndpointConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingProber(AtomicUsize);

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, _: &ProxyEndpoint) -> std::result::Result<(), ProbeFailure> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn source() -> InMemorySource {
        [
            RawEndpointConfig::new("wg0", "Endpoint = 10.0.0.1:2408"),
            RawEndpointConfig::new("wg1", "Endpoint = 10.0.0.2:2408"),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_probes_and_shuts_down() {
        let prober = Arc::new(CountingProber::default());
        let services = Services::start(
            AdmissionConfig::default(),
            PoolConfig::default(),
            &source(),
            prober.clone(),
        )
        .await
        .unwrap();

        assert_eq!(services.pool().len(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(prober.0.load(Ordering::SeqCst), 2);

        // One more cycle after the probe interval
        tokio::time::sleep(PoolConfig::default().probe_interval).await;
        assert_eq!(prober.0.load(Ordering::SeqCst), 4);

        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_gateway_respects_proxy_flag() {
        let services = Services::start_idle(AdmissionConfig::default(), PoolConfig::default(), &source())
            .await
            .unwrap();
        let extractor: Arc<dyn Extractor> =
            Arc::new(crate::extract::ExtractorBuilder::default().extractor().unwrap());

        assert!(services.gateway(extractor.clone(), true).pool().is_some());
        assert!(services.gateway(extractor, false).pool().is_none());
        services.shutdown().await;
    }
}
