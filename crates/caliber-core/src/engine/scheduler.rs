//! Background task deciding when the engine drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::SyncEngine;
use crate::connectivity::ConnectivitySignal;
use crate::remote::RemoteBackend;
use crate::state::SyncState;

/// Cloneable "sync now" button for user actions and app foregrounding.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a drain. Requests made while a drain runs collapse into one.
    pub fn fire(&self) {
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Drives a `SyncEngine` from connectivity changes, a timer, and manual triggers.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the scheduler loop on the current tokio runtime.
    ///
    /// Drains right away when online, then on every offline to online
    /// transition, on each interval tick while online, and on manual triggers
    /// while online.
    pub fn spawn<B>(engine: Arc<SyncEngine<B>>, connectivity: ConnectivitySignal) -> SchedulerHandle
    where
        B: RemoteBackend + 'static,
    {
        let trigger = SyncTrigger::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = engine.subscribe();
        let stopping = engine.stop_flag();
        stopping.store(false, Ordering::SeqCst);

        let task = tokio::spawn(run(engine, connectivity, trigger.clone(), shutdown_rx));

        SchedulerHandle {
            trigger,
            state,
            stopping,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner side of a running scheduler. Dropping it stops the loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    trigger: SyncTrigger,
    state: watch::Receiver<SyncState>,
    stopping: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn trigger(&self) {
        self.trigger.fire();
    }

    pub fn trigger_handle(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Cancel the running cycle, if any, and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = (&mut self.task).await {
            tracing::warn!("Sync scheduler task ended abnormally: {error}");
        }
        self.stopping.store(false, Ordering::SeqCst);
    }
}

async fn run<B: RemoteBackend>(
    engine: Arc<SyncEngine<B>>,
    mut connectivity: ConnectivitySignal,
    trigger: SyncTrigger,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut interval = engine.config().sync_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut watching = true;

    if connectivity.is_online() {
        drain(&engine, "startup").await;
    } else {
        engine.publish(SyncState::Offline);
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            change = connectivity.next_change(), if watching => match change {
                Some(true) => drain(&engine, "reconnected").await,
                Some(false) => engine.publish(SyncState::Offline),
                None => watching = false,
            },
            () = trigger.notify.notified() => {
                if connectivity.is_online() {
                    drain(&engine, "manual").await;
                } else {
                    tracing::debug!("Ignoring sync trigger while offline");
                }
            }
            () = tick(interval.as_mut()) => {
                if connectivity.is_online() {
                    drain(&engine, "interval").await;
                }
            }
        }
    }

    tracing::debug!("Sync scheduler stopped");
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drain<B: RemoteBackend>(engine: &SyncEngine<B>, reason: &'static str) {
    if engine.stop_flag().load(Ordering::SeqCst) {
        tracing::debug!(reason, "Scheduler stopping; skipping drain");
        return;
    }
    tracing::debug!(reason, "Starting drain cycle");
    match engine.drain().await {
        Ok(Some(report)) if !report.is_noop() => {
            tracing::info!(
                reason,
                succeeded = report.succeeded(),
                failed = report.failed(),
                conflicts = report.conflicts(),
                "Sync cycle complete"
            );
        }
        Ok(_) => {}
        Err(error) => tracing::warn!(reason, "Sync cycle failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::connectivity::connectivity;
    use crate::models::MutationKind;
    use crate::remote::testing::ScriptedBackend;
    use crate::services::SyncStore;
    use serde_json::json;
    use std::time::Duration;

    async fn setup(
        sync_interval: Option<Duration>,
    ) -> (Arc<SyncEngine<ScriptedBackend>>, SyncStore, ScriptedBackend) {
        let store = SyncStore::open_in_memory_with_clock(Arc::new(ManualClock::new(1_000)))
            .await
            .unwrap();
        let backend = ScriptedBackend::new();
        let config = EngineConfig {
            sync_interval,
            ..EngineConfig::default()
        };
        let engine = Arc::new(SyncEngine::new(store.clone(), backend.clone(), config));
        (engine, store, backend)
    }

    async fn enqueue(store: &SyncStore, id: &str) {
        store
            .enqueue(MutationKind::Create, "item", json!({ "id": id }))
            .await
            .unwrap();
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drains_when_connectivity_returns() {
        let (engine, store, backend) = setup(None).await;
        enqueue(&store, "1").await;
        let (network, signal) = connectivity(false);

        let handle = SyncScheduler::spawn(engine, signal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.calls().is_empty());
        assert_eq!(handle.state(), SyncState::Offline);

        network.set_online(true);
        wait_for(|| backend.calls().len() == 1).await;
        wait_for(|| handle.state() == SyncState::Synced).await;

        network.set_online(false);
        wait_for(|| handle.state() == SyncState::Offline).await;
        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_trigger_drains_while_online() {
        let (engine, store, backend) = setup(None).await;
        let handle = SyncScheduler::spawn(engine, ConnectivitySignal::fixed(true));
        tokio::time::sleep(Duration::from_millis(50)).await;

        enqueue(&store, "1").await;
        handle.trigger_handle().fire();
        wait_for(|| backend.calls().len() == 1).await;
        assert!(store.list_pending().await.unwrap().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_trigger_ignored_while_offline() {
        let (engine, store, backend) = setup(None).await;
        enqueue(&store, "1").await;
        let handle = SyncScheduler::spawn(engine, ConnectivitySignal::fixed(false));

        handle.trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.calls().is_empty());
        assert_eq!(handle.state(), SyncState::Offline);
        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interval_drains_while_online() {
        let (engine, store, backend) = setup(Some(Duration::from_millis(40))).await;
        let handle = SyncScheduler::spawn(engine, ConnectivitySignal::fixed(true));
        tokio::time::sleep(Duration::from_millis(20)).await;

        enqueue(&store, "1").await;
        wait_for(|| backend.calls().len() == 1).await;
        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trigger_during_shutdown_does_not_deliver() {
        let (engine, store, backend) = setup(None).await;
        let handle = SyncScheduler::spawn(Arc::clone(&engine), ConnectivitySignal::fixed(true));
        wait_for(|| handle.state() == SyncState::Synced).await;

        // What `shutdown` sets before the loop has seen its signal.
        engine.stop_flag().store(true, Ordering::SeqCst);
        enqueue(&store, "1").await;
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.calls().is_empty());
        assert_eq!(store.list_pending().await.unwrap().len(), 1);

        handle.shutdown().await;
        assert!(!engine.stop_flag().load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_stops_the_loop() {
        let (engine, store, backend) = setup(None).await;
        let handle = SyncScheduler::spawn(engine, ConnectivitySignal::fixed(true));
        let trigger = handle.trigger_handle();
        handle.shutdown().await;

        enqueue(&store, "1").await;
        trigger.fire();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.calls().is_empty());
    }
}
