//! Reader-behavior telemetry: active reading time, scroll depth and session
//! context for content units, synchronized best-effort to an ingestion API.

pub mod activity;
pub mod config;
pub mod host;
pub mod impression;
pub mod lifecycle;
pub mod models;
pub mod replay;
pub mod scroll;
pub mod session;
pub mod sync;
pub mod tracker;
mod utils;

pub use activity::InputKind;
pub use config::TrackerConfig;
pub use host::{HeadlessHost, PageHost, ScrollMetrics};
pub use impression::{Impression, ImpressionMetrics, ImpressionSnapshot, ImpressionStatus};
pub use lifecycle::{PageEvent, PageEventSender, Visibility};
pub use models::{DeviceContext, Dimensions, InteractionEvent, InteractionType, Session};
pub use sync::{HttpTransport, IngestTransport};
pub use tracker::BehaviorTracker;

/// Entry point of the `telemetry-replay` binary.
pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(replay::run_from_args()));

    if let Err(err) = result {
        log::error!("replay failed: {err:#}");
        std::process::exit(1);
    }
}
