mod outbox;
pub mod registry;
pub mod state;

pub use registry::{ImpressionSnapshot, ImpressionTracker};
pub use state::{Impression, ImpressionMetrics, ImpressionStatus, READING_COMPLETE_THRESHOLD_PCT};
