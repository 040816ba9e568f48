//! Performance statistics over the retained history
//!
//! Recomputed from scratch on every request in one pass. Nothing is
//! cached between calls, so a report always matches the history it was
//! computed from.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{Signal, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_signals: usize,
    pub buy_up_count: usize,
    pub buy_down_count: usize,
    pub no_trade_count: usize,
    pub average_edge_up: Option<f64>,
    pub average_edge_down: Option<f64>,
    pub max_edge_up: Option<f64>,
    pub max_edge_down: Option<f64>,
    /// Strictly positive edge values across both channels
    pub positive_edge_count: usize,
    pub regime_distribution: BTreeMap<String, usize>,
}

/// Running sum/count/max for one edge channel
#[derive(Debug, Default)]
struct EdgeAccumulator {
    sum: f64,
    count: usize,
    max: Option<f64>,
}

impl EdgeAccumulator {
    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn average(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }
}

/// Summarize a history, oldest first
pub fn performance_report<'a, I>(history: I) -> PerformanceReport
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let mut total = 0;
    let mut buy_up = 0;
    let mut buy_down = 0;
    let mut no_trade = 0;
    let mut up = EdgeAccumulator::default();
    let mut down = EdgeAccumulator::default();
    let mut positive = 0;
    let mut regimes: BTreeMap<String, usize> = BTreeMap::new();

    for snapshot in history {
        total += 1;

        match snapshot.signal() {
            Signal::BuyUp => buy_up += 1,
            Signal::BuyDown => buy_down += 1,
            Signal::NoTrade => no_trade += 1,
        }

        if let Some(v) = snapshot.edge_up() {
            up.observe(v);
            if v > 0.0 {
                positive += 1;
            }
        }
        if let Some(v) = snapshot.edge_down() {
            down.observe(v);
            if v > 0.0 {
                positive += 1;
            }
        }

        *regimes.entry(snapshot.regime().to_string()).or_insert(0) += 1;
    }

    PerformanceReport {
        total_signals: total,
        buy_up_count: buy_up,
        buy_down_count: buy_down,
        no_trade_count: no_trade,
        average_edge_up: up.average(),
        average_edge_down: down.average(),
        max_edge_up: up.max,
        max_edge_down: down.max,
        positive_edge_count: positive,
        regime_distribution: regimes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SnapshotStore;
    use serde_json::json;

    fn approx(actual: Option<f64>, expected: f64) -> bool {
        actual.map_or(false, |a| (a - expected).abs() < 1e-12)
    }

    #[test]
    fn test_empty_history() {
        let store = SnapshotStore::new(10);
        let report = performance_report(store.iter());

        assert_eq!(report.total_signals, 0);
        assert_eq!(report.buy_up_count, 0);
        assert_eq!(report.buy_down_count, 0);
        assert_eq!(report.no_trade_count, 0);
        assert_eq!(report.average_edge_up, None);
        assert_eq!(report.average_edge_down, None);
        assert_eq!(report.max_edge_up, None);
        assert_eq!(report.max_edge_down, None);
        assert_eq!(report.positive_edge_count, 0);
        assert!(report.regime_distribution.is_empty());
    }

    #[test]
    fn test_buy_up_and_no_trade() {
        let mut store = SnapshotStore::new(10);
        store.append(json!({"signal": "BUY UP", "edge": {"edgeUp": 0.05, "edgeDown": -0.02}}));
        store.append(json!({"signal": "NO TRADE", "edge": {"edgeUp": 0.10}}));

        let report = performance_report(store.iter());
        assert_eq!(report.total_signals, 2);
        assert_eq!(report.buy_up_count, 1);
        assert_eq!(report.no_trade_count, 1);
        assert!(approx(report.average_edge_up, 0.075));
        assert!(approx(report.average_edge_down, -0.02));
        assert_eq!(report.max_edge_up, Some(0.10));
        assert_eq!(report.max_edge_down, Some(-0.02));
        assert_eq!(report.positive_edge_count, 2);
    }

    #[test]
    fn test_non_finite_edges_ignored() {
        let mut store = SnapshotStore::new(10);
        store.append(json!({"edge": {"edgeUp": 0.2}}));
        let before = performance_report(store.iter());

        // serde_json stores NaN as null
        store.append(json!({"edge": {"edgeUp": f64::NAN, "edgeDown": f64::INFINITY}}));
        store.append(json!({"edge": {"edgeUp": "0.9", "edgeDown": null}}));
        store.append(json!({"edge": null}));
        let after = performance_report(store.iter());

        assert_eq!(after.average_edge_up, before.average_edge_up);
        assert_eq!(after.max_edge_up, Some(0.2));
        assert_eq!(after.average_edge_down, None);
        assert_eq!(after.positive_edge_count, 1);
        assert_eq!(after.total_signals, 4);
    }

    #[test]
    fn test_unknown_signals_are_no_trade() {
        let mut store = SnapshotStore::new(10);
        store.append(json!({"signal": "BUY DOWN"}));
        store.append(json!({"signal": "HOLD"}));
        store.append(json!({"signal": 5}));
        store.append(json!({}));

        let report = performance_report(store.iter());
        assert_eq!(report.buy_down_count, 1);
        assert_eq!(report.no_trade_count, 3);
        assert_eq!(
            report.buy_up_count + report.buy_down_count + report.no_trade_count,
            report.total_signals
        );
    }

    #[test]
    fn test_regime_distribution() {
        let mut store = SnapshotStore::new(10);
        store.append(json!({"regime": "TRENDING"}));
        store.append(json!({"regime": "TRENDING"}));
        store.append(json!({"indicators": {"regime": "RANGING"}}));
        store.append(json!({"signal": "BUY UP"}));

        let report = performance_report(store.iter());
        assert_eq!(report.regime_distribution.get("TRENDING"), Some(&2));
        assert_eq!(report.regime_distribution.get("RANGING"), Some(&1));
        assert_eq!(report.regime_distribution.get("UNKNOWN"), Some(&1));
    }

    #[test]
    fn test_report_is_idempotent() {
        let mut store = SnapshotStore::new(3);
        for i in 0..7 {
            store.append(json!({"signal": "BUY UP", "edge": {"edgeUp": i as f64 / 10.0}}));
        }

        let first = performance_report(store.iter());
        let second = performance_report(store.iter());
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        // Only the three retained snapshots count
        assert_eq!(first.total_signals, 3);
        assert_eq!(first.max_edge_up, Some(0.6));
    }

    #[test]
    fn test_report_json_shape() {
        let report = performance_report(SnapshotStore::new(1).iter());
        let value = serde_json::to_value(report).unwrap();
        assert_eq!(
            value,
            json!({
                "totalSignals": 0,
                "buyUpCount": 0,
                "buyDownCount": 0,
                "noTradeCount": 0,
                "averageEdgeUp": null,
                "averageEdgeDown": null,
                "maxEdgeUp": null,
                "maxEdgeDown": null,
                "positiveEdgeCount": 0,
                "regimeDistribution": {}
            })
        );
    }
}
