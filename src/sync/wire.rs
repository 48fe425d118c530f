//! Request and response bodies of the ingestion API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::impression::ImpressionMetrics;
use crate::models::{DeviceContext, Dimensions, InteractionType};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub viewport: Dimensions,
    pub screen_resolution: Dimensions,
    pub timezone: String,
    pub language: String,
}

impl CreateSessionRequest {
    pub fn new(user_id: Option<String>, device: &DeviceContext) -> Self {
        Self {
            user_id,
            viewport: device.viewport,
            screen_resolution: device.screen_resolution,
            timezone: device.timezone.clone(),
            language: device.language.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub device_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateImpressionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub article_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateImpressionResponse {
    pub impression_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateImpressionRequest {
    pub impression_id: String,
    pub scroll_depth: u8,
    /// Whole seconds.
    pub active_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

impl UpdateImpressionRequest {
    pub fn from_metrics(impression_id: String, metrics: &ImpressionMetrics) -> Self {
        Self {
            impression_id,
            scroll_depth: metrics.scroll_depth_pct,
            active_time: ms_to_rounded_secs(metrics.active_time_ms),
            reading_complete: metrics.reading_complete,
            end: metrics.end.then_some(true),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInteractionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub article_id: String,
    pub interaction_type: InteractionType,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationClickRequest {
    pub recommendation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub article_id: String,
}

/// Half-up rounding, so 29_500 ms reports as 30 s.
pub fn ms_to_rounded_secs(ms: u64) -> u64 {
    ms.saturating_add(500) / 1000
}
