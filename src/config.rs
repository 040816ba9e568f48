//! Runtime configuration
//!
//! Parsed from command-line flags with environment fallbacks. `.env` is
//! loaded by the binary before parsing.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{DEFAULT_HEARTBEAT, DEFAULT_QUEUE_CAPACITY};
use crate::error::{AppError, Result};
use crate::store::DEFAULT_CAPACITY;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Maximum number of snapshots retained in memory
    #[arg(long, env = "BUFFER_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Interface to bind the HTTP/WebSocket server on
    #[arg(long, env = "BIND_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to run the web server on
    #[arg(short, long, env = "BIND_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds between liveness pings on the push channel
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT.as_secs())]
    pub heartbeat_secs: u64,

    /// Outbound frames queued per client before it is disconnected
    #[arg(long, env = "CONSUMER_BUFFER", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub consumer_buffer: usize,

    /// Directory of static dashboard assets served at `/`
    #[arg(long, env = "FRONTEND_DIR")]
    pub frontend_dir: Option<PathBuf>,

    /// Generate synthetic snapshots instead of waiting for a producer
    #[arg(long, env = "DEMO_MODE")]
    pub demo: bool,

    /// Tick interval of the demo producer in milliseconds
    #[arg(long, env = "DEMO_INTERVAL_MS", default_value_t = 1000)]
    pub demo_interval_ms: u64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(AppError::Config("capacity must be at least 1".into()));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::Config("bind host must not be empty".into()));
        }
        if self.heartbeat_secs == 0 {
            return Err(AppError::Config("heartbeat interval must be at least 1s".into()));
        }
        if self.consumer_buffer == 0 {
            return Err(AppError::Config("consumer buffer must be at least 1".into()));
        }
        if self.demo && self.demo_interval_ms == 0 {
            return Err(AppError::Config("demo interval must be at least 1ms".into()));
        }
        Ok(())
    }

    /// `host:port`, resolved by the listener at bind time
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn demo_interval(&self) -> Duration {
        Duration::from_millis(self.demo_interval_ms)
    }
}
