use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, str::FromStr, time::Duration};

const DEFAULT_API_ENDPOINT: &str = "/api";
const DEFAULT_API_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SCROLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Path prefix of the ingestion API, or a full URL.
    pub api_endpoint: String,
    /// Scheme and host used when `api_endpoint` is a bare path.
    pub api_origin: String,
    pub debug: bool,
    pub inactivity_timeout_ms: u64,
    pub scroll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub sample_scroll_while_inactive: bool,
    /// Reported as `metadata.source` on interaction events.
    pub source: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            session_id: None,
            api_endpoint: DEFAULT_API_ENDPOINT.into(),
            api_origin: DEFAULT_API_ORIGIN.into(),
            debug: false,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
            scroll_interval_ms: DEFAULT_SCROLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            sample_scroll_while_inactive: true,
            source: "web".into(),
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid tracker config in {}", path.display()))
    }

    /// Defaults overridden by `TELEMETRY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(endpoint) = env::var("TELEMETRY_API_ENDPOINT") {
            config.api_endpoint = endpoint;
        }
        if let Ok(origin) = env::var("TELEMETRY_API_ORIGIN") {
            config.api_origin = origin;
        }
        config.user_id = env::var("TELEMETRY_USER_ID").ok().filter(|v| !v.is_empty());
        config.session_id = env::var("TELEMETRY_SESSION_ID").ok().filter(|v| !v.is_empty());
        config.debug = env::var("TELEMETRY_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if let Some(ms) = parse_var::<u64>("TELEMETRY_IDLE_TIMEOUT_MS")? {
            config.inactivity_timeout_ms = ms;
        }
        if let Some(ms) = parse_var::<u64>("TELEMETRY_SCROLL_INTERVAL_MS")? {
            config.scroll_interval_ms = ms;
        }

        Ok(config)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn scroll_interval(&self) -> Duration {
        // A zero period would panic inside `tokio::time::interval`.
        Duration::from_millis(self.scroll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Absolute base URL the transport appends resource paths to.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.api_endpoint.trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }

        let origin = self.api_origin.trim_end_matches('/');
        if endpoint.is_empty() {
            origin.to_string()
        } else if endpoint.starts_with('/') {
            format!("{origin}{endpoint}")
        } else {
            format!("{origin}/{endpoint}")
        }
    }
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {key} value '{raw}'")),
        Err(_) => Ok(None),
    }
}
