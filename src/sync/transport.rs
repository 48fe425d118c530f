use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::wire::{
    CreateImpressionRequest, CreateImpressionResponse, CreateSessionRequest,
    CreateSessionResponse, EndSessionRequest, RecommendationClickRequest,
    TrackInteractionRequest, UpdateImpressionRequest,
};

/// The ingestion backend. Implementations report failures; they never retry.
#[async_trait]
pub trait IngestTransport: Send + Sync {
    async fn create_session(&self, request: &CreateSessionRequest)
        -> Result<CreateSessionResponse>;

    async fn end_session(&self, request: &EndSessionRequest) -> Result<()>;

    async fn create_impression(
        &self,
        request: &CreateImpressionRequest,
    ) -> Result<CreateImpressionResponse>;

    async fn update_impression(&self, request: &UpdateImpressionRequest) -> Result<()>;

    async fn track_interaction(&self, request: &TrackInteractionRequest) -> Result<()>;

    async fn track_recommendation_click(&self, request: &RecommendationClickRequest)
        -> Result<()>;
}

/// JSON-over-HTTP transport for the `/sessions`, `/impressions`,
/// `/interactions/track` and `/recommendations` resources.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build ingestion HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        self.client
            .request(method.clone(), &url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{method} {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{method} {url} rejected"))
    }

    async fn send_json<B, R>(&self, method: Method, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        response
            .json::<R>()
            .await
            .with_context(|| format!("invalid response body from {path}"))
    }
}

#[async_trait]
impl IngestTransport for HttpTransport {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse> {
        self.send_json(Method::POST, "/sessions", request).await
    }

    async fn end_session(&self, request: &EndSessionRequest) -> Result<()> {
        self.send(Method::PUT, "/sessions", request).await.map(|_| ())
    }

    async fn create_impression(
        &self,
        request: &CreateImpressionRequest,
    ) -> Result<CreateImpressionResponse> {
        self.send_json(Method::POST, "/impressions", request).await
    }

    async fn update_impression(&self, request: &UpdateImpressionRequest) -> Result<()> {
        self.send(Method::PUT, "/impressions", request).await.map(|_| ())
    }

    async fn track_interaction(&self, request: &TrackInteractionRequest) -> Result<()> {
        self.send(Method::POST, "/interactions/track", request)
            .await
            .map(|_| ())
    }

    async fn track_recommendation_click(
        &self,
        request: &RecommendationClickRequest,
    ) -> Result<()> {
        self.send(Method::POST, "/recommendations", request)
            .await
            .map(|_| ())
    }
}
