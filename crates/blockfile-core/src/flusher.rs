use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::cache::WriteBackCache;
use crate::error::{StoreError, StoreResult};

/// Periodic flush-and-evict task.
///
/// Stops when [`stop`](Self::stop) is awaited or the handle is dropped.
pub(crate) struct FlushTask {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTask {
    /// Spawn on the current tokio runtime.
    pub fn spawn(cache: Arc<WriteBackCache>, period: Duration) -> StoreResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Config("background flushing requires a tokio runtime".into())
        })?;
        let (shutdown, rx) = watch::channel(false);
        let handle = runtime.spawn(run(cache, period, rx));
        info!(period_ms = period.as_millis() as u64, "background flusher started");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the task and wait for it to finish its current pass.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "background flusher panicked");
            }
        }
    }
}

impl Drop for FlushTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run(cache: Arc<WriteBackCache>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let report = cache.flush_all().await;
                if !report.is_clean() {
                    debug!(failures = report.failures.len(), "flush pass left dirty entries");
                }
                cache.evict_clean();
            }
        }
    }
    debug!("background flusher stopped");
}
