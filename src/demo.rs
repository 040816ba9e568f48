//! Synthetic snapshot producer
//!
//! Stands in for the trading loop when running the dashboard on its own.
//! Emits one bot-state snapshot per tick with a random walk price, an
//! up/down edge pair, a trade signal and a regime label.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::feed::Feed;

const REGIMES: [&str; 4] = ["TRENDING_UP", "TRENDING_DOWN", "RANGING", "VOLATILE"];

/// Minimum edge before the demo bot "takes" a trade
const EDGE_THRESHOLD: f64 = 0.05;

/// Mutable state carried between demo ticks
#[derive(Debug, Clone)]
pub struct DemoBot {
    tick: u64,
    price: f64,
}

impl Default for DemoBot {
    fn default() -> Self {
        Self { tick: 0, price: 0.5 }
    }
}

impl DemoBot {
    /// Produce the next raw snapshot
    pub fn next_snapshot<R: Rng>(&mut self, rng: &mut R) -> Value {
        self.tick += 1;
        self.price = (self.price + rng.gen_range(-0.01..0.01)).clamp(0.01, 0.99);

        let model_up: f64 = (self.price + rng.gen_range(-0.08..0.08)).clamp(0.0, 1.0);
        let edge_up = model_up - self.price;
        let edge_down = (1.0 - model_up) - (1.0 - self.price) - rng.gen_range(0.0..0.01);

        let signal = if edge_up >= EDGE_THRESHOLD && edge_up >= edge_down {
            "BUY UP"
        } else if edge_down >= EDGE_THRESHOLD {
            "BUY DOWN"
        } else {
            "NO TRADE"
        };

        // Occasionally drop a field so consumers see realistic gaps
        let edge = if rng.gen_bool(0.05) {
            json!({ "edgeUp": edge_up, "edgeDown": null })
        } else {
            json!({ "edgeUp": edge_up, "edgeDown": edge_down })
        };

        json!({
            "tick": self.tick,
            "market": { "upPrice": self.price, "downPrice": 1.0 - self.price },
            "model": { "probUp": model_up },
            "edge": edge,
            "signal": signal,
            "regime": REGIMES[rng.gen_range(0..REGIMES.len())],
        })
    }
}

/// Publish a synthetic snapshot every `interval` until the task is aborted
pub async fn run_demo_producer(feed: Feed, interval: Duration) {
    info!(interval_ms = interval.as_millis() as u64, "Starting demo producer");

    let mut rng = StdRng::from_entropy();
    let mut bot = DemoBot::default();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let raw = bot.next_snapshot(&mut rng);
        feed.publish(raw).await;
    }
}
