pub mod sampler;

pub use sampler::{scroll_percent, ScrollSampler};
