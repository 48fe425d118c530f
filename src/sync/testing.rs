//! In-memory transport that records every call.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};
use std::time::Duration;

use super::transport::IngestTransport;
use super::wire::{
    CreateImpressionRequest, CreateImpressionResponse, CreateSessionRequest,
    CreateSessionResponse, EndSessionRequest, RecommendationClickRequest,
    TrackInteractionRequest, UpdateImpressionRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateSession(CreateSessionRequest),
    EndSession(EndSessionRequest),
    CreateImpression(CreateImpressionRequest),
    UpdateImpression(UpdateImpressionRequest),
    TrackInteraction(TrackInteractionRequest),
    RecommendationClick(RecommendationClickRequest),
}

#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    create_delay: Mutex<Duration>,
    fail_session_create: AtomicBool,
    fail_impression_create: AtomicBool,
    fail_updates: AtomicBool,
    panic_on_update: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays both create calls, measured on the tokio clock.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.create_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_session_create(self) -> Self {
        self.fail_session_create.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_impression_create(self) -> Self {
        self.fail_impression_create.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_updates(self) -> Self {
        self.fail_updates.store(true, Ordering::SeqCst);
        self
    }

    /// Update calls panic, taking the impression's delivery task down.
    pub fn panicking_updates(self) -> Self {
        self.panic_on_update.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<UpdateImpressionRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UpdateImpression(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn delay(&self) {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl IngestTransport for RecordingTransport {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse> {
        self.record(Call::CreateSession(request.clone()));
        self.delay().await;
        if self.fail_session_create.load(Ordering::SeqCst) {
            bail!("session endpoint unavailable");
        }
        Ok(CreateSessionResponse {
            session_id: self.next_id("session"),
            device_fingerprint: "fp-test".into(),
        })
    }

    async fn end_session(&self, request: &EndSessionRequest) -> Result<()> {
        self.record(Call::EndSession(request.clone()));
        Ok(())
    }

    async fn create_impression(
        &self,
        request: &CreateImpressionRequest,
    ) -> Result<CreateImpressionResponse> {
        self.record(Call::CreateImpression(request.clone()));
        self.delay().await;
        if self.fail_impression_create.load(Ordering::SeqCst) {
            bail!("impression endpoint unavailable");
        }
        Ok(CreateImpressionResponse {
            impression_id: self.next_id("imp"),
        })
    }

    async fn update_impression(&self, request: &UpdateImpressionRequest) -> Result<()> {
        self.record(Call::UpdateImpression(request.clone()));
        if self.panic_on_update.load(Ordering::SeqCst) {
            panic!("update handler crashed");
        }
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("impression update rejected");
        }
        Ok(())
    }

    async fn track_interaction(&self, request: &TrackInteractionRequest) -> Result<()> {
        self.record(Call::TrackInteraction(request.clone()));
        Ok(())
    }

    async fn track_recommendation_click(
        &self,
        request: &RecommendationClickRequest,
    ) -> Result<()> {
        self.record(Call::RecommendationClick(request.clone()));
        Ok(())
    }
}
