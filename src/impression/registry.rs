use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use chrono::Utc;
use log::debug;
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};

use crate::session::SessionManager;
use crate::sync::SyncClient;

use super::outbox::Outbox;
use super::state::{Impression, ImpressionMetrics};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionSnapshot {
    pub impression: Impression,
    /// Closed intervals plus the one still open.
    pub current_active_ms: u64,
}

struct LiveImpression {
    state: Impression,
    outbox: mpsc::UnboundedSender<ImpressionMetrics>,
    worker: JoinHandle<()>,
}

impl LiveImpression {
    fn checkpoint(&mut self, now: Instant) -> bool {
        match self.state.mark_inactive(now) {
            Some(metrics) => {
                let _ = self.outbox.send(metrics);
                true
            }
            None => false,
        }
    }

    fn finish(&mut self, now: Instant) -> Option<ImpressionMetrics> {
        let metrics = self.state.finish(now)?;
        let _ = self.outbox.send(metrics);
        Some(metrics)
    }
}

pub(crate) struct Registry {
    live: HashMap<String, LiveImpression>,
    next_generation: u64,
    /// Bumped on every idle-timer arm; a firing timer must still hold the
    /// current value to expire anything.
    idle_epoch: u64,
}

impl Registry {
    fn bump_epoch(&mut self) -> u64 {
        self.idle_epoch = self.idle_epoch.wrapping_add(1);
        self.idle_epoch
    }

    fn checkpoint_all(&mut self, now: Instant) -> usize {
        let mut closed = 0;
        for live in self.live.values_mut() {
            if live.checkpoint(now) {
                closed += 1;
            }
        }
        closed
    }
}

/// Records the server id on the impression that requested it, unless that
/// impression has ended or been replaced by a newer generation.
pub(crate) async fn attach_server_id(
    registry: &Weak<Mutex<Registry>>,
    content_id: &str,
    generation: u64,
    impression_id: &str,
) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut guard = registry.lock().await;
    match guard.live.get_mut(content_id) {
        Some(live) if live.state.generation == generation => {
            live.state.impression_id = Some(impression_id.to_string());
        }
        _ => debug!("Discarding stale impression id for {content_id} (generation {generation})"),
    }
}

/// Live impressions keyed by content id.
#[derive(Clone)]
pub struct ImpressionTracker {
    registry: Arc<Mutex<Registry>>,
    draining: Arc<Mutex<Vec<JoinHandle<()>>>>,
    sync: SyncClient,
    session: SessionManager,
    sample_while_inactive: bool,
    debug: bool,
}

impl ImpressionTracker {
    pub fn new(
        sync: SyncClient,
        session: SessionManager,
        sample_while_inactive: bool,
        debug: bool,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                live: HashMap::new(),
                next_generation: 0,
                idle_epoch: 0,
            })),
            draining: Arc::new(Mutex::new(Vec::new())),
            sync,
            session,
            sample_while_inactive,
            debug,
        }
    }

    /// Opens an impression in the active state and queues its create call.
    /// Returns false if `content_id` is already being tracked.
    pub async fn start(&self, content_id: &str) -> bool {
        self.session.begin().await;

        let mut registry = self.registry.lock().await;
        if registry.live.contains_key(content_id) {
            return false;
        }

        registry.next_generation += 1;
        let generation = registry.next_generation;

        let (outbox, updates) = mpsc::unbounded_channel();
        let worker = tokio::spawn(
            Outbox {
                content_id: content_id.to_string(),
                generation,
                sync: self.sync.clone(),
                session: self.session.clone(),
                registry: Arc::downgrade(&self.registry),
                debug: self.debug,
            }
            .run(updates),
        );

        let state = Impression::start(content_id.to_string(), generation, Instant::now(), Utc::now());
        registry.live.insert(
            content_id.to_string(),
            LiveImpression {
                state,
                outbox,
                worker,
            },
        );
        true
    }

    /// Closes and removes the impression, queueing its final update.
    /// Untracked ids are ignored.
    pub async fn end(&self, content_id: &str) -> Option<ImpressionMetrics> {
        let (metrics, worker) = {
            let mut registry = self.registry.lock().await;
            let mut live = registry.live.remove(content_id)?;
            let metrics = live.finish(Instant::now())?;
            (metrics, live.worker)
        };

        self.track_draining(worker).await;
        Some(metrics)
    }

    /// Ends every live impression and hands back their delivery workers.
    pub async fn end_all(&self) -> Vec<JoinHandle<()>> {
        let mut registry = self.registry.lock().await;
        let now = Instant::now();
        registry
            .live
            .drain()
            .map(|(_, mut live)| {
                live.finish(now);
                live.worker
            })
            .collect()
    }

    /// Marks every live impression active and returns the new idle epoch,
    /// or `None` when nothing is being tracked.
    pub async fn touch(&self) -> Option<u64> {
        let mut registry = self.registry.lock().await;
        if registry.live.is_empty() {
            return None;
        }
        let now = Instant::now();
        for live in registry.live.values_mut() {
            live.state.mark_active(now);
        }
        Some(registry.bump_epoch())
    }

    /// New idle epoch for a freshly started impression. Impressions that
    /// already went idle stay idle.
    pub async fn next_idle_epoch(&self) -> Option<u64> {
        let mut registry = self.registry.lock().await;
        if registry.live.is_empty() {
            return None;
        }
        Some(registry.bump_epoch())
    }

    /// Idle-timer expiry. Ignored unless `epoch` is still current.
    pub async fn expire_idle(&self, epoch: u64) -> usize {
        let mut registry = self.registry.lock().await;
        if registry.idle_epoch != epoch {
            return 0;
        }
        registry.checkpoint_all(Instant::now())
    }

    /// Backgrounding: every impression goes inactive and any armed idle
    /// timer is invalidated.
    pub async fn suspend_all(&self) -> usize {
        let mut registry = self.registry.lock().await;
        registry.bump_epoch();
        registry.checkpoint_all(Instant::now())
    }

    pub async fn record_scroll(&self, sampled_pct: u8) -> usize {
        let mut registry = self.registry.lock().await;
        let mut raised = 0;
        for live in registry.live.values_mut() {
            if !self.sample_while_inactive && !live.state.is_active() {
                continue;
            }
            if live.state.record_scroll(sampled_pct) {
                raised += 1;
            }
        }
        raised
    }

    pub async fn live_count(&self) -> usize {
        self.registry.lock().await.live.len()
    }

    pub async fn get(&self, content_id: &str) -> Option<ImpressionSnapshot> {
        let registry = self.registry.lock().await;
        let now = Instant::now();
        registry.live.get(content_id).map(|live| snapshot_of(&live.state, now))
    }

    pub async fn snapshot(&self) -> Vec<ImpressionSnapshot> {
        let registry = self.registry.lock().await;
        let now = Instant::now();
        let mut snapshots: Vec<_> = registry
            .live
            .values()
            .map(|live| snapshot_of(&live.state, now))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.impression.generation);
        snapshots
    }

    /// Waits for every ended impression's final update to be delivered.
    pub async fn drain(&self) {
        let workers: Vec<_> = self.draining.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                debug!("Impression delivery task stopped early: {err}");
            }
        }
    }

    async fn track_draining(&self, worker: JoinHandle<()>) {
        let mut draining = self.draining.lock().await;
        draining.retain(|handle| !handle.is_finished());
        draining.push(worker);
    }
}

fn snapshot_of(state: &Impression, now: Instant) -> ImpressionSnapshot {
    ImpressionSnapshot {
        impression: state.clone(),
        current_active_ms: state.current_active_ms(now),
    }
}
