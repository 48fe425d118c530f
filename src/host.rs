use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::models::DeviceContext;

/// Scroll position of the page hosting the content, in CSS pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

/// What the embedding environment exposes to the tracker.
pub trait PageHost: Send + Sync {
    fn device_context(&self) -> DeviceContext;

    /// `None` when there is no document to measure.
    fn scroll_metrics(&self) -> Option<ScrollMetrics>;
}

/// A host without a window; scroll position is pushed in by the embedder.
pub struct HeadlessHost {
    device: Mutex<DeviceContext>,
    scroll: Mutex<Option<ScrollMetrics>>,
}

impl HeadlessHost {
    pub fn new(device: DeviceContext) -> Self {
        Self {
            device: Mutex::new(device),
            scroll: Mutex::new(None),
        }
    }

    pub fn set_scroll(&self, metrics: ScrollMetrics) {
        let mut guard = match self.scroll.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(metrics);
    }

    pub fn set_device(&self, device: DeviceContext) {
        let mut guard = match self.device.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = device;
    }
}

impl PageHost for HeadlessHost {
    fn device_context(&self) -> DeviceContext {
        match self.device.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn scroll_metrics(&self) -> Option<ScrollMetrics> {
        match self.scroll.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
