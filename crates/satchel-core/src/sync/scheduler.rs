//! Periodic full sync in a background task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::orchestrator::{SyncMode, SyncOrchestrator};
use crate::error::Error;
use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0:?}")]
    InvalidInterval(Duration),
}

#[derive(Clone)]
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    running: Arc<AtomicBool>,
    task: Arc<Mutex<Option<LoopHandle>>>,
}

struct LoopHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the loop. The first run starts immediately.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.interval < Duration::from_secs(1) {
            return Err(SchedulerError::InvalidInterval(self.interval));
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::new(Notify::new());
        let interval = self.interval;
        let join = tokio::spawn({
            let shutdown = Arc::clone(&shutdown);
            async move { Self::run_loop(orchestrator, running, shutdown, interval).await }
        });
        *self.task.lock().await = Some(LoopHandle { shutdown, join });

        tracing::info!("Sync scheduler started (every {:?})", self.interval);
        Ok(())
    }

    /// Stop the loop. A run already in flight is allowed to finish first.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(SchedulerError::NotRunning);
        }
        let handle = self.task.lock().await.take();
        if let Some(LoopHandle { shutdown, join }) = handle {
            shutdown.notify_one();
            if let Err(error) = join.await {
                tracing::warn!("Sync scheduler task ended abnormally: {}", error);
            }
        }
        tracing::info!("Sync scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn run_loop(
        orchestrator: Arc<SyncOrchestrator>,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::Acquire) {
            tokio::select! {
                biased;
                () = shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            match orchestrator.sync(SyncMode::Full).await {
                Ok(report) if report.is_success() => {
                    tracing::debug!("Scheduled sync finished");
                }
                Ok(report) => {
                    tracing::warn!(failed = report.failures.len(), "Scheduled sync finished with failures");
                }
                Err(Error::AlreadySyncing) => {
                    tracing::debug!("Scheduled sync skipped; another run is in flight");
                }
                Err(Error::Gateway(GatewayError::Offline)) => {
                    tracing::debug!("Scheduled sync skipped; offline");
                }
                Err(error) => {
                    tracing::warn!("Scheduled sync failed: {}", error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::models::{CollectionRegistry, CollectionSchema, SyncRecord};
    use crate::state::SyncPhase;
    use crate::store::{LocalStore, MemoryStore};
    use crate::sync::{SyncEvent, SyncStatus};
    use crate::sync::testing::ScriptedGateway;

    fn scheduler(interval: Duration) -> (SyncScheduler, Arc<ScriptedGateway>) {
        let mut config = SyncConfig::new("http://remote.test/api/sync");
        config.registry =
            CollectionRegistry::new(vec![CollectionSchema::passthrough("students")]).unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(MemoryStore::new()),
            gateway.clone(),
            &config,
        ));
        (SyncScheduler::new(orchestrator, interval), gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_full_sync_on_every_tick() {
        let (scheduler, gateway) = scheduler(Duration::from_secs(60));
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(gateway.pull_calls() >= 2);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        let calls = gateway.pull_calls();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(gateway.pull_calls(), calls);
    }

    #[tokio::test]
    async fn stop_lets_the_run_in_flight_finish() {
        let mut config = SyncConfig::new("http://remote.test/api/sync");
        config.registry =
            CollectionRegistry::new(vec![CollectionSchema::passthrough("students")]).unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_many("students", &[SyncRecord::new("s1", serde_json::Map::new())])
            .await
            .unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let gate = gateway.gate();
        let orchestrator = Arc::new(SyncOrchestrator::new(store.clone(), gateway.clone(), &config));
        let mut events = orchestrator.subscribe();
        let scheduler = SyncScheduler::new(Arc::clone(&orchestrator), Duration::from_secs(60));

        scheduler.start().await.unwrap();
        gate.entered.notified().await;
        assert_eq!(orchestrator.phase().await, SyncPhase::Syncing);

        let stopping = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.stop().await })
        };
        tokio::task::yield_now().await;
        gate.release.notify_one();
        stopping.await.unwrap().unwrap();

        assert!(!scheduler.is_running());
        assert!(!orchestrator.is_syncing());
        assert_eq!(orchestrator.phase().await, SyncPhase::Idle);
        assert_eq!(store.count_dirty("students").await.unwrap(), 0);

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::SyncStatus { status } = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![SyncStatus::Success]);
        assert_eq!(gateway.push_calls(), 1);
    }

    #[tokio::test]
    async fn rejects_sub_second_interval_and_double_stop() {
        let (scheduler, _gateway) = scheduler(Duration::from_millis(10));
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::InvalidInterval(_))
        ));
        assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));
    }
}
