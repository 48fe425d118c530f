pub mod monitor;

pub use monitor::{ActivityMonitor, InputKind};
