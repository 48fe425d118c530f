use std::{sync::Arc, time::Duration};

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::impression::ImpressionTracker;
use crate::log_info;

const ENABLE_LOGS: bool = false;

/// Input signals that count as reader activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Pointer,
    Keyboard,
    Touch,
    Scroll,
}

/// Debounces input into active/idle.
///
/// Every qualifying input re-arms one single-shot idle timer. When it fires
/// unrenewed, live impressions go inactive and checkpoint.
#[derive(Clone)]
pub struct ActivityMonitor {
    impressions: ImpressionTracker,
    idle_timeout: Duration,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ActivityMonitor {
    pub fn new(impressions: ImpressionTracker, idle_timeout: Duration) -> Self {
        Self {
            impressions,
            idle_timeout,
            timer: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns false when no impression is live to attribute the input to.
    pub async fn record_input(&self, kind: InputKind) -> bool {
        trace!("input: {kind:?}");
        self.rearm().await
    }

    /// Marks live impressions active and restarts the idle window.
    pub async fn rearm(&self) -> bool {
        // The epoch is taken under the timer lock so the armed timer always
        // carries the newest epoch.
        let mut timer = self.timer.lock().await;
        match self.impressions.touch().await {
            Some(epoch) => {
                self.replace_timer(&mut timer, epoch);
                true
            }
            None => false,
        }
    }

    /// Restarts the idle window for a newly started impression without
    /// waking impressions that already went idle.
    pub async fn restart(&self) -> bool {
        let mut timer = self.timer.lock().await;
        match self.impressions.next_idle_epoch().await {
            Some(epoch) => {
                self.replace_timer(&mut timer, epoch);
                true
            }
            None => false,
        }
    }

    pub async fn disarm(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }

    fn replace_timer(&self, timer: &mut Option<JoinHandle<()>>, epoch: u64) {
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let impressions = self.impressions.clone();
        let idle_timeout = self.idle_timeout;
        *timer = Some(tokio::spawn(async move {
            time::sleep(idle_timeout).await;
            let expired = impressions.expire_idle(epoch).await;
            if expired > 0 {
                log_info!("{expired} impression(s) idle after {}s", idle_timeout.as_secs());
            }
        }));
    }
}
