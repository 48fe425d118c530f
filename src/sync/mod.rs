pub mod client;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use client::SyncClient;
pub use transport::{HttpTransport, IngestTransport};
