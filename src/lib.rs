// Library crate - telemetry store, aggregation and live push channel

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod demo;
pub mod error;
pub mod feed;
pub mod logging;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use feed::Feed;
pub use types::*;
