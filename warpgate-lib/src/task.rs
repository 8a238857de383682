use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A periodic background job owned by the hosting process.
///
/// The job first runs after `delay`, then once per `period`, until
/// [`shutdown`](Self::shutdown) is called. Dropping the handle without
/// shutting down aborts the job.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `job` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<F, Fut>(
        name: &'static str,
        delay: Duration,
        period: Duration,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            // A zero period would make `interval_at` panic
            let period = period.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    _ = stopped.changed() => break,
                }
            }
            debug!("Background task `{name}` stopped");
        });

        Self {
            name,
            stop,
            handle: Some(handle),
        }
    }

    /// Name given at spawn time
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the job is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the job to stop and wait until it has. A job that is in the
    /// middle of a run finishes that run first.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("Background task `{}` ended abnormally: {e}", self.name);
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
