use std::sync::{Arc, RwLock};

use crate::impression::ImpressionMetrics;
use crate::models::{DeviceContext, InteractionEvent};
use crate::{debug_log, log_warn};

use super::transport::IngestTransport;
use super::wire::{
    CreateImpressionRequest, CreateSessionRequest, CreateSessionResponse, EndSessionRequest,
    RecommendationClickRequest, TrackInteractionRequest, UpdateImpressionRequest,
};

const ENABLE_LOGS: bool = true;

/// Best-effort boundary to the ingestion backend.
///
/// Every call swallows its failure after logging it, so callers only see
/// whether the call succeeded. Nothing here retries or queues.
#[derive(Clone)]
pub struct SyncClient {
    transport: Arc<dyn IngestTransport>,
    user_id: Arc<RwLock<Option<String>>>,
    source: String,
    debug: bool,
}

impl SyncClient {
    pub fn new(
        transport: Arc<dyn IngestTransport>,
        user_id: Option<String>,
        source: impl Into<String>,
        debug: bool,
    ) -> Self {
        Self {
            transport,
            user_id: Arc::new(RwLock::new(user_id)),
            source: source.into(),
            debug,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        match self.user_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        let mut guard = match self.user_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = user_id;
    }

    pub async fn create_session(&self, device: &DeviceContext) -> Option<CreateSessionResponse> {
        let request = CreateSessionRequest::new(self.user_id(), device);
        match self.transport.create_session(&request).await {
            Ok(response) => Some(response),
            Err(err) => {
                log_warn!("Failed to start session: {err:#}");
                None
            }
        }
    }

    pub async fn end_session(&self, session_id: &str) -> bool {
        let request = EndSessionRequest {
            session_id: session_id.to_string(),
        };
        match self.transport.end_session(&request).await {
            Ok(()) => true,
            Err(err) => {
                log_warn!("Failed to end session {session_id}: {err:#}");
                false
            }
        }
    }

    /// Returns the server-issued impression id.
    pub async fn create_impression(
        &self,
        content_id: &str,
        session_id: Option<String>,
    ) -> Option<String> {
        let request = CreateImpressionRequest {
            user_id: self.user_id(),
            article_id: content_id.to_string(),
            session_id,
        };
        match self.transport.create_impression(&request).await {
            Ok(response) => Some(response.impression_id),
            Err(err) => {
                log_warn!("Failed to start impression for {content_id}: {err:#}");
                None
            }
        }
    }

    pub async fn update_impression(&self, impression_id: &str, metrics: &ImpressionMetrics) -> bool {
        let request = UpdateImpressionRequest::from_metrics(impression_id.to_string(), metrics);
        match self.transport.update_impression(&request).await {
            Ok(()) => true,
            Err(err) => {
                let what = if metrics.end { "end" } else { "update" };
                log_warn!("Failed to {what} impression {impression_id}: {err:#}");
                false
            }
        }
    }

    pub async fn track_interaction(&self, event: &InteractionEvent, session_id: Option<&str>) -> bool {
        let request = TrackInteractionRequest {
            user_id: self.user_id(),
            article_id: event.content_id.clone(),
            interaction_type: event.kind,
            metadata: event.enriched_metadata(session_id, &self.source),
        };
        match self.transport.track_interaction(&request).await {
            Ok(()) => {
                debug_log!(
                    self.debug,
                    "Interaction tracked: {} {}",
                    event.kind.as_str(),
                    event.content_id
                );
                true
            }
            Err(err) => {
                log_warn!("Failed to track interaction: {err:#}");
                false
            }
        }
    }

    pub async fn track_recommendation_click(&self, recommendation_id: &str, content_id: &str) -> bool {
        let request = RecommendationClickRequest {
            recommendation_id: recommendation_id.to_string(),
            user_id: self.user_id(),
            article_id: content_id.to_string(),
        };
        match self.transport.track_recommendation_click(&request).await {
            Ok(()) => true,
            Err(err) => {
                log_warn!("Failed to track recommendation click: {err:#}");
                false
            }
        }
    }
}
