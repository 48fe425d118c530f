use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::host::{PageHost, ScrollMetrics};
use crate::impression::ImpressionTracker;
use crate::log_info;

const ENABLE_LOGS: bool = false;

/// `round(100 * (scrollTop + viewportHeight) / documentHeight)`, clamped to
/// `[0, 100]`. `None` for an empty or unmeasurable document.
pub fn scroll_percent(metrics: &ScrollMetrics) -> Option<u8> {
    let ScrollMetrics {
        scroll_top,
        viewport_height,
        document_height,
    } = *metrics;

    if !document_height.is_finite() || document_height <= 0.0 {
        return None;
    }
    let raw = (100.0 * (scroll_top + viewport_height) / document_height).round();
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(0.0, 100.0) as u8)
}

/// Dropping this (with the last sampler clone) cancels the loop.
struct RunningLoop {
    handle: JoinHandle<()>,
    cancel_on_drop: DropGuard,
}

/// Polls the host's scroll position into live impressions.
#[derive(Clone)]
pub struct ScrollSampler {
    host: Arc<dyn PageHost>,
    impressions: ImpressionTracker,
    period: Duration,
    running: Arc<Mutex<Option<RunningLoop>>>,
}

impl ScrollSampler {
    pub fn new(host: Arc<dyn PageHost>, impressions: ImpressionTracker, period: Duration) -> Self {
        Self {
            host,
            impressions,
            period,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts polling; a no-op if already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(scroll_loop(
            self.host.clone(),
            self.impressions.clone(),
            self.period,
            cancel_token.clone(),
        ));
        *running = Some(RunningLoop {
            handle,
            cancel_on_drop: cancel_token.drop_guard(),
        });
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let RunningLoop {
            handle,
            cancel_on_drop,
        } = running;
        drop(cancel_on_drop);
        handle.await.context("scroll sampling task failed to join")
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Takes one sample immediately.
    pub async fn sample_once(&self) -> Option<u8> {
        sample(self.host.as_ref(), &self.impressions).await
    }
}

async fn sample(host: &dyn PageHost, impressions: &ImpressionTracker) -> Option<u8> {
    let pct = scroll_percent(&host.scroll_metrics()?)?;
    impressions.record_scroll(pct).await;
    Some(pct)
}

async fn scroll_loop(
    host: Arc<dyn PageHost>,
    impressions: ImpressionTracker,
    period: Duration,
    cancel_token: CancellationToken,
) {
    // First sample one period after start.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sample(host.as_ref(), &impressions).await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("scroll sampling stopped");
                break;
            }
        }
    }
}
