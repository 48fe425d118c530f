use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Scroll depth strictly above this marks the content as read.
pub const READING_COMPLETE_THRESHOLD_PCT: u8 = 90;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ImpressionStatus {
    OpenActive,
    OpenInactive,
    Closed,
}

/// Progress reported to the backend, either as a checkpoint or as the final
/// update of an impression.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionMetrics {
    pub scroll_depth_pct: u8,
    pub active_time_ms: u64,
    pub reading_complete: Option<bool>,
    pub end: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    pub impression_id: Option<String>,
    pub content_id: String,
    pub generation: u64,
    pub status: ImpressionStatus,
    pub start_time: DateTime<Utc>,
    /// Sum of closed active intervals only.
    pub active_time_ms: u64,
    pub scroll_depth_pct: u8,
    /// Start of the open active interval; meaningless while inactive.
    #[serde(skip)]
    pub last_active: Instant,
}

impl Impression {
    pub fn start(content_id: String, generation: u64, now: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            impression_id: None,
            content_id,
            generation,
            status: ImpressionStatus::OpenActive,
            start_time: wall,
            active_time_ms: 0,
            scroll_depth_pct: 0,
            last_active: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ImpressionStatus::OpenActive
    }

    pub fn is_open(&self) -> bool {
        self.status != ImpressionStatus::Closed
    }

    /// Accumulated time plus the open interval, without closing it.
    pub fn current_active_ms(&self, now: Instant) -> u64 {
        if self.is_active() {
            self.active_time_ms
                .saturating_add(elapsed_ms(self.last_active, now))
        } else {
            self.active_time_ms
        }
    }

    pub fn reading_complete(&self) -> bool {
        self.scroll_depth_pct > READING_COMPLETE_THRESHOLD_PCT
    }

    /// Opens a new interval. Returns false when already active or closed.
    pub fn mark_active(&mut self, now: Instant) -> bool {
        if self.status != ImpressionStatus::OpenInactive {
            return false;
        }
        self.last_active = now;
        self.status = ImpressionStatus::OpenActive;
        true
    }

    /// Closes the open interval and returns the checkpoint to send, if the
    /// impression was active.
    pub fn mark_inactive(&mut self, now: Instant) -> Option<ImpressionMetrics> {
        if !self.is_active() {
            return None;
        }
        self.close_interval(now);
        self.status = ImpressionStatus::OpenInactive;
        Some(self.metrics(false))
    }

    /// Raises the recorded depth to `sampled_pct` (clamped to 100). Never lowers it.
    pub fn record_scroll(&mut self, sampled_pct: u8) -> bool {
        let sampled = sampled_pct.min(100);
        if !self.is_open() || sampled <= self.scroll_depth_pct {
            return false;
        }
        self.scroll_depth_pct = sampled;
        true
    }

    /// Terminal transition. Returns the final update exactly once.
    pub fn finish(&mut self, now: Instant) -> Option<ImpressionMetrics> {
        match self.status {
            ImpressionStatus::Closed => None,
            ImpressionStatus::OpenActive => {
                self.close_interval(now);
                self.status = ImpressionStatus::Closed;
                Some(self.metrics(true))
            }
            ImpressionStatus::OpenInactive => {
                self.status = ImpressionStatus::Closed;
                Some(self.metrics(true))
            }
        }
    }

    fn close_interval(&mut self, now: Instant) {
        self.active_time_ms = self
            .active_time_ms
            .saturating_add(elapsed_ms(self.last_active, now));
        self.last_active = now;
    }

    fn metrics(&self, end: bool) -> ImpressionMetrics {
        ImpressionMetrics {
            scroll_depth_pct: self.scroll_depth_pct,
            active_time_ms: self.active_time_ms,
            reading_complete: end.then(|| self.reading_complete()),
            end,
        }
    }
}

fn elapsed_ms(from: Instant, to: Instant) -> u64 {
    to.saturating_duration_since(from).as_millis() as u64
}
