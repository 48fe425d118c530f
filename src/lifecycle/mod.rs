pub mod bridge;

pub use bridge::{LifecycleBridge, LifecycleHandler, PageEvent, PageEventSender, Visibility};
