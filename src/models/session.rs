use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Environment reported to the backend when a session is opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContext {
    pub viewport: Dimensions,
    pub screen_resolution: Dimensions,
    pub timezone: String,
    pub language: String,
}

impl DeviceContext {
    /// Best-effort context for hosts that have no window to measure.
    ///
    /// The timezone is the local UTC offset (`+02:00`); the language comes
    /// from `LANG` with the encoding suffix stripped (`en_US.UTF-8` -> `en-US`).
    pub fn detect() -> Self {
        let timezone = Local::now().offset().to_string();
        let language = std::env::var("LANG")
            .ok()
            .and_then(|raw| normalize_language(&raw))
            .unwrap_or_else(|| "en-US".to_string());

        Self {
            viewport: Dimensions::default(),
            screen_resolution: Dimensions::default(),
            timezone,
            language,
        }
    }
}

fn normalize_language(raw: &str) -> Option<String> {
    let tag = raw.split(['.', '@']).next()?.trim();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return None;
    }
    Some(tag.replace('_', "-"))
}

/// One instrumented browsing visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub device_fingerprint: String,
    pub start_time: DateTime<Utc>,
    pub viewport: Dimensions,
    pub screen_resolution: Dimensions,
    pub timezone: String,
    pub language: String,
}

impl Session {
    pub fn opened(
        session_id: String,
        device_fingerprint: String,
        device: &DeviceContext,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            device_fingerprint,
            start_time,
            viewport: device.viewport,
            screen_resolution: device.screen_resolution,
            timezone: device.timezone.clone(),
            language: device.language.clone(),
        }
    }
}
