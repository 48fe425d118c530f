use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::activity::{ActivityMonitor, InputKind};
use crate::config::TrackerConfig;
use crate::host::PageHost;
use crate::impression::{ImpressionMetrics, ImpressionSnapshot, ImpressionTracker};
use crate::lifecycle::{LifecycleBridge, LifecycleHandler, PageEventSender, Visibility};
use crate::models::{InteractionEvent, Session};
use crate::scroll::ScrollSampler;
use crate::session::SessionManager;
use crate::sync::{HttpTransport, IngestTransport, SyncClient};
use crate::{debug_log, log_warn};

const ENABLE_LOGS: bool = true;

struct TrackerInner {
    config: TrackerConfig,
    sync: SyncClient,
    session: SessionManager,
    impressions: ImpressionTracker,
    activity: ActivityMonitor,
    scroll: ScrollSampler,
    bridge: LifecycleBridge,
    unloaded: AtomicBool,
    unload_flush: Mutex<Option<JoinHandle<()>>>,
}

/// Reader-behavior tracker for one page load.
///
/// Built once at bootstrap with [`BehaviorTracker::init`] and shut down with
/// [`BehaviorTracker::teardown`]. Instrumentation calls never fail: misuse and
/// network errors degrade to no-ops. After unload every call is a no-op.
#[derive(Clone)]
pub struct BehaviorTracker {
    inner: Arc<TrackerInner>,
}

impl BehaviorTracker {
    /// Opens the session in the background and registers lifecycle listeners.
    pub async fn init(
        config: TrackerConfig,
        host: Arc<dyn PageHost>,
        transport: Arc<dyn IngestTransport>,
    ) -> Self {
        let sync = SyncClient::new(
            transport,
            config.user_id.clone(),
            config.source.clone(),
            config.debug,
        );
        let session = SessionManager::new(
            sync.clone(),
            host.clone(),
            config.session_id.clone(),
            config.debug,
        );
        let impressions = ImpressionTracker::new(
            sync.clone(),
            session.clone(),
            config.sample_scroll_while_inactive,
            config.debug,
        );
        let activity = ActivityMonitor::new(impressions.clone(), config.inactivity_timeout());
        let scroll = ScrollSampler::new(host, impressions.clone(), config.scroll_interval());

        let tracker = Self {
            inner: Arc::new(TrackerInner {
                config,
                sync,
                session,
                impressions,
                activity,
                scroll,
                bridge: LifecycleBridge::new(),
                unloaded: AtomicBool::new(false),
                unload_flush: Mutex::new(None),
            }),
        };

        tracker.inner.session.begin().await;
        let listener = Arc::new(PageListener(Arc::downgrade(&tracker.inner)));
        if let Err(err) = tracker.inner.bridge.attach(listener).await {
            log_warn!("Lifecycle listeners not registered: {err:#}");
        }
        debug_log!(tracker.inner.config.debug, "Tracker initialised");
        tracker
    }

    /// `init` against the HTTP ingestion API named by the config.
    pub async fn connect(config: TrackerConfig, host: Arc<dyn PageHost>) -> Result<Self> {
        let transport = HttpTransport::new(config.endpoint_url(), config.request_timeout())?;
        Ok(Self::init(config, host, Arc::new(transport)).await)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn is_unloaded(&self) -> bool {
        self.inner.unloaded.load(Ordering::SeqCst)
    }

    /// Channel for the host's input, visibility and unload signals.
    pub fn page_events(&self) -> PageEventSender {
        self.inner.bridge.sender()
    }

    pub async fn start_session(&self) -> Option<Session> {
        if self.is_unloaded() {
            return None;
        }
        self.inner.session.start_session().await
    }

    /// Ends every live impression, waits for their final updates, then
    /// closes the session.
    pub async fn end_session(&self) -> Option<Session> {
        if self.is_unloaded() {
            return None;
        }
        self.finish_session().await
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.session.session().await
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        self.inner.sync.set_user_id(user_id);
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.sync.user_id()
    }

    pub async fn start_impression(&self, content_id: &str) -> bool {
        if self.is_unloaded() || !self.inner.impressions.start(content_id).await {
            return false;
        }
        self.inner.activity.restart().await;
        self.inner.scroll.start().await;
        true
    }

    pub async fn end_impression(&self, content_id: &str) -> Option<ImpressionMetrics> {
        if self.is_unloaded() {
            return None;
        }
        let metrics = self.inner.impressions.end(content_id).await?;
        if self.inner.impressions.live_count().await == 0 {
            self.stop_timers().await;
        }
        Some(metrics)
    }

    pub async fn active_impressions(&self) -> Vec<ImpressionSnapshot> {
        self.inner.impressions.snapshot().await
    }

    /// Fire-and-forget. The handle resolves to whether the backend accepted it.
    pub fn track_interaction(&self, event: InteractionEvent) -> Option<JoinHandle<bool>> {
        if self.is_unloaded() {
            return None;
        }
        let sync = self.inner.sync.clone();
        let session = self.inner.session.clone();
        Some(tokio::spawn(async move {
            let session_id = session.current_id().await;
            sync.track_interaction(&event, session_id.as_deref()).await
        }))
    }

    /// Fire-and-forget click attribution for a recommended content unit.
    pub fn track_recommendation_click(
        &self,
        recommendation_id: &str,
        content_id: &str,
    ) -> Option<JoinHandle<bool>> {
        if self.is_unloaded() {
            return None;
        }
        let sync = self.inner.sync.clone();
        let recommendation_id = recommendation_id.to_string();
        let content_id = content_id.to_string();
        Some(tokio::spawn(async move {
            sync.track_recommendation_click(&recommendation_id, &content_id)
                .await
        }))
    }

    pub async fn record_input(&self, kind: InputKind) {
        if self.is_unloaded() {
            return;
        }
        self.inner.activity.record_input(kind).await;
    }

    /// Hidden pages count as idle, not closed.
    pub async fn set_visibility(&self, visibility: Visibility) {
        if self.is_unloaded() {
            return;
        }
        match visibility {
            Visibility::Hidden => {
                self.inner.activity.disarm().await;
                self.inner.impressions.suspend_all().await;
            }
            Visibility::Visible => {
                self.inner.activity.rearm().await;
            }
        }
    }

    /// Starts the final flush and returns without waiting for it.
    pub async fn unload(&self) {
        if self.inner.unloaded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.bridge.cancel();

        let this = self.clone();
        let flush = tokio::spawn(async move {
            this.finish_session().await;
        });
        *self.inner.unload_flush.lock().await = Some(flush);
    }

    /// Ends the session if still open, detaches listeners, and gives
    /// outstanding deliveries up to the request timeout to finish.
    pub async fn teardown(&self) {
        if !self.inner.unloaded.swap(true, Ordering::SeqCst) {
            self.finish_session().await;
        }
        if let Err(err) = self.inner.bridge.stop().await {
            log_warn!("Lifecycle listeners did not stop cleanly: {err:#}");
        }

        let grace = self.inner.config.request_timeout();
        let flush = self.inner.unload_flush.lock().await.take();
        if let Some(flush) = flush {
            if time::timeout(grace, flush).await.is_err() {
                log_warn!("Unload flush still in flight after {}ms", grace.as_millis());
            }
        }
        if time::timeout(grace, self.inner.impressions.drain()).await.is_err() {
            log_warn!("Impression updates still in flight after {}ms", grace.as_millis());
        }
        self.stop_timers().await;
        debug_log!(self.inner.config.debug, "Tracker torn down");
    }

    async fn finish_session(&self) -> Option<Session> {
        let workers = self.inner.impressions.end_all().await;
        self.stop_timers().await;
        for worker in workers {
            if let Err(err) = worker.await {
                debug!("Impression delivery task stopped early: {err}");
            }
        }
        self.inner.session.end_session().await
    }

    async fn stop_timers(&self) {
        self.inner.activity.disarm().await;
        if let Err(err) = self.inner.scroll.stop().await {
            log_warn!("Scroll sampling did not stop cleanly: {err:#}");
        }
    }
}

#[async_trait]
impl LifecycleHandler for BehaviorTracker {
    async fn on_input(&self, kind: InputKind) {
        self.record_input(kind).await;
    }

    async fn on_visibility_change(&self, visibility: Visibility) {
        self.set_visibility(visibility).await;
    }

    async fn on_unload(&self) {
        self.unload().await;
    }
}

/// Pump-side handle. Holding the tracker weakly lets a dropped tracker
/// close its event channel and stop the pump.
struct PageListener(Weak<TrackerInner>);

impl PageListener {
    fn tracker(&self) -> Option<BehaviorTracker> {
        self.0.upgrade().map(|inner| BehaviorTracker { inner })
    }
}

#[async_trait]
impl LifecycleHandler for PageListener {
    async fn on_input(&self, kind: InputKind) {
        if let Some(tracker) = self.tracker() {
            tracker.on_input(kind).await;
        }
    }

    async fn on_visibility_change(&self, visibility: Visibility) {
        if let Some(tracker) = self.tracker() {
            tracker.on_visibility_change(visibility).await;
        }
    }

    async fn on_unload(&self) {
        if let Some(tracker) = self.tracker() {
            tracker.on_unload().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HeadlessHost, ScrollMetrics};
    use crate::impression::ImpressionStatus;
    use crate::lifecycle::PageEvent;
    use crate::models::{DeviceContext, InteractionType};
    use crate::sync::testing::{Call, RecordingTransport};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        tracker: BehaviorTracker,
        transport: Arc<RecordingTransport>,
        host: Arc<HeadlessHost>,
    }

    async fn harness_with(transport: RecordingTransport, config: TrackerConfig) -> Harness {
        let transport = Arc::new(transport);
        let host = Arc::new(HeadlessHost::new(DeviceContext::detect()));
        let tracker = BehaviorTracker::init(config, host.clone(), transport.clone()).await;
        Harness {
            tracker,
            transport,
            host,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingTransport::new(), TrackerConfig::default()).await
    }

    fn scrolled_to(pct_of_4000: f64) -> ScrollMetrics {
        // 800px viewport over a 4000px document.
        ScrollMetrics {
            scroll_top: 4000.0 * pct_of_4000 / 100.0 - 800.0,
            viewport_height: 800.0,
            document_height: 4000.0,
        }
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_closes_one_interval_and_checkpoints() {
        let h = harness().await;

        h.tracker.start_impression("article-1").await;
        h.tracker.record_input(InputKind::Pointer).await;
        sleep_ms(30_100).await;

        let updates = h.transport.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].active_time, 30);
        assert_eq!(updates[0].end, None);

        let live = h.tracker.active_impressions().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].impression.status, ImpressionStatus::OpenInactive);
        assert!((30_000..30_050).contains(&live[0].impression.active_time_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn input_before_timeout_defers_idle() {
        let h = harness().await;

        h.tracker.start_impression("article-1").await;
        sleep_ms(20_000).await;
        h.tracker.record_input(InputKind::Keyboard).await;
        sleep_ms(20_000).await;

        assert!(h.transport.updates().is_empty());
        let live = h.tracker.active_impressions().await;
        assert_eq!(live[0].impression.status, ImpressionStatus::OpenActive);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_depth_keeps_maximum_of_polled_samples() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;

        // Positions change half a period before each poll, so every poll
        // sees exactly one of them; the reader ends scrolled back up.
        sleep_ms(500).await;
        for sample in [20.0, 55.0, 80.0, 40.0] {
            h.host.set_scroll(scrolled_to(sample));
            sleep_ms(1_000).await;
        }

        let last = h.tracker.end_impression("article-1").await.unwrap();
        assert_eq!(last.scroll_depth_pct, 80);
        assert_eq!(last.reading_complete, Some(false));

        h.tracker.teardown().await;
        let finals: Vec<_> = h
            .transport
            .updates()
            .into_iter()
            .filter(|update| update.end == Some(true))
            .collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].scroll_depth, 80);
        assert_eq!(finals[0].reading_complete, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn deep_scroll_marks_reading_complete() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;

        h.host.set_scroll(scrolled_to(96.0));
        sleep_ms(1_500).await;
        let last = h.tracker.end_impression("article-1").await.unwrap();

        assert_eq!(last.reading_complete, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn hide_and_show_cycle_the_same_impression() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        let generation = h.tracker.active_impressions().await[0].impression.generation;

        sleep_ms(5_000).await;
        h.tracker.set_visibility(Visibility::Hidden).await;
        let hidden = h.tracker.active_impressions().await;
        assert_eq!(hidden[0].impression.status, ImpressionStatus::OpenInactive);

        sleep_ms(5_000).await;
        h.tracker.set_visibility(Visibility::Visible).await;
        let shown = h.tracker.active_impressions().await;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].impression.generation, generation);
        assert_eq!(shown[0].impression.status, ImpressionStatus::OpenActive);

        sleep_ms(10_000).await;
        let last = h.tracker.end_impression("article-1").await.unwrap();
        // 5s before hiding plus 10s after showing; the hidden 5s is not counted.
        assert!((15_000..15_050).contains(&last.active_time_ms));

        let checkpoints: Vec<_> = h
            .transport
            .updates()
            .into_iter()
            .filter(|update| update.end.is_none())
            .collect();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].active_time, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_another_impression_leaves_idle_ones_idle() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        sleep_ms(30_100).await;

        h.tracker.start_impression("article-2").await;
        sleep_ms(10_000).await;

        let live = h.tracker.active_impressions().await;
        assert_eq!(live[0].impression.content_id, "article-1");
        assert_eq!(live[0].impression.status, ImpressionStatus::OpenInactive);
        assert_eq!(live[1].impression.status, ImpressionStatus::OpenActive);

        let first = h.tracker.end_impression("article-1").await.unwrap();
        assert!((30_000..30_050).contains(&first.active_time_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_tracker_is_released_without_teardown() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        let inner = Arc::downgrade(&h.tracker.inner);

        drop(h);
        tokio::task::yield_now().await;

        assert!(inner.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_closes_even_if_a_delivery_task_panics() {
        let h = harness_with(
            RecordingTransport::new().panicking_updates(),
            TrackerConfig::default(),
        )
        .await;
        h.tracker.start_impression("article-1").await;
        sleep_ms(100).await;

        assert!(h.tracker.end_session().await.is_some());
        assert!(matches!(h.transport.calls().last(), Some(Call::EndSession(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn end_before_create_resolves_is_deferred_and_sent_once() {
        let h = harness_with(
            RecordingTransport::new().with_create_delay(Duration::from_millis(500)),
            TrackerConfig::default(),
        )
        .await;

        h.tracker.start_impression("article-1").await;
        assert!(h.tracker.end_impression("article-1").await.is_some());
        assert!(h.transport.updates().is_empty());

        sleep_ms(2_000).await;

        let calls = h.transport.calls();
        let create_at = calls
            .iter()
            .position(|call| matches!(call, Call::CreateImpression(_)))
            .unwrap();
        let update_at = calls
            .iter()
            .position(|call| matches!(call, Call::UpdateImpression(_)))
            .unwrap();
        assert!(create_at < update_at);

        let updates = h.transport.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].end, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn impression_create_carries_session_id() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        sleep_ms(10).await;

        let create = h
            .transport
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::CreateImpression(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(create.article_id, "article-1");
        assert_eq!(create.session_id.as_deref(), Some("session-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn end_on_untracked_content_is_silent() {
        let h = harness().await;
        sleep_ms(10).await;
        let before = h.transport.calls().len();

        assert!(h.tracker.end_impression("never-started").await.is_none());
        sleep_ms(10).await;

        assert_eq!(h.transport.calls().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_stop_with_the_last_impression() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        h.tracker.start_impression("article-2").await;
        assert!(h.tracker.inner.scroll.is_running().await);

        h.tracker.end_impression("article-1").await;
        assert!(h.tracker.inner.scroll.is_running().await);

        h.tracker.end_impression("article-2").await;
        assert!(!h.tracker.inner.scroll.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn end_session_flushes_impressions_before_closing() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        h.tracker.start_impression("article-2").await;
        sleep_ms(3_000).await;

        let ended = h.tracker.end_session().await;

        assert!(ended.is_some());
        assert!(h.tracker.active_impressions().await.is_empty());
        let calls = h.transport.calls();
        let finals = calls
            .iter()
            .filter(|call| matches!(call, Call::UpdateImpression(u) if u.end == Some(true)))
            .count();
        assert_eq!(finals, 2);
        assert!(matches!(calls.last(), Some(Call::EndSession(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn unload_flushes_and_makes_tracker_inert() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        sleep_ms(2_000).await;

        h.tracker.page_events().send(PageEvent::Unload).unwrap();
        sleep_ms(10).await;
        assert!(h.tracker.is_unloaded());

        h.tracker.teardown().await;
        let calls = h.transport.calls();
        let final_at = calls
            .iter()
            .position(|call| matches!(call, Call::UpdateImpression(u) if u.end == Some(true)))
            .unwrap();
        let end_at = calls
            .iter()
            .position(|call| matches!(call, Call::EndSession(_)))
            .unwrap();
        assert!(final_at < end_at);

        assert!(!h.tracker.start_impression("article-2").await);
        assert!(h.tracker.end_impression("article-1").await.is_none());
        assert!(h
            .tracker
            .track_interaction(InteractionEvent::new("article-1", InteractionType::Like))
            .is_none());
        assert!(h.tracker.start_session().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn page_events_drive_activity() {
        let h = harness().await;
        h.tracker.start_impression("article-1").await;
        let events = h.tracker.page_events();

        events.send(PageEvent::Visibility(Visibility::Hidden)).unwrap();
        sleep_ms(10).await;
        assert_eq!(
            h.tracker.active_impressions().await[0].impression.status,
            ImpressionStatus::OpenInactive
        );

        events.send(PageEvent::Input(InputKind::Touch)).unwrap();
        sleep_ms(10).await;
        assert_eq!(
            h.tracker.active_impressions().await[0].impression.status,
            ImpressionStatus::OpenActive
        );

        h.tracker.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interactions_carry_session_and_user() {
        let h = harness().await;
        h.tracker.start_session().await;
        h.tracker.set_user_id(Some("reader-42".into()));

        let accepted = h
            .tracker
            .track_interaction(
                InteractionEvent::new("article-9", InteractionType::Save)
                    .with_metadata(json!({ "folder": "later" })),
            )
            .unwrap()
            .await
            .unwrap();
        assert!(accepted);

        let request = h
            .transport
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::TrackInteraction(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(request.user_id.as_deref(), Some("reader-42"));
        assert_eq!(request.article_id, "article-9");
        assert_eq!(request.interaction_type, InteractionType::Save);
        assert_eq!(
            request.metadata,
            json!({ "folder": "later", "sessionId": "session-1", "source": "web" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recommendation_clicks_are_attributed() {
        let h = harness().await;
        h.tracker.set_user_id(Some("reader-42".into()));

        h.tracker
            .track_recommendation_click("rec-3", "article-5")
            .unwrap()
            .await
            .unwrap();

        assert!(h.transport.calls().iter().any(|call| matches!(
            call,
            Call::RecommendationClick(request)
                if request.recommendation_id == "rec-3"
                    && request.article_id == "article-5"
                    && request.user_id.as_deref() == Some("reader-42")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_updates_do_not_disturb_local_state() {
        let h = harness_with(
            RecordingTransport::new().failing_updates(),
            TrackerConfig::default(),
        )
        .await;
        h.tracker.start_impression("article-1").await;
        sleep_ms(31_000).await;

        let live = h.tracker.active_impressions().await;
        assert_eq!(live[0].impression.status, ImpressionStatus::OpenInactive);
        assert_eq!(h.transport.updates().len(), 1);

        let last = h.tracker.end_impression("article-1").await.unwrap();
        assert!((30_000..30_050).contains(&last.active_time_ms));
    }
}
