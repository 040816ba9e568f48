use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::num::IntErrorKind;
use std::sync::Arc;

use super::AppState;
use crate::aggregator::PerformanceReport;
use crate::error::AppError;
use crate::store::HistoryPage;
use crate::types::Snapshot;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Response for the status endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub last_update_timestamp: Option<i64>,
    pub buffer_size: usize,
    pub buffer_max_size: usize,
    pub buffer_utilization_percent: f64,
}

/// Query params for the history endpoint.
///
/// Kept as raw strings so malformed values fall back to defaults instead
/// of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQueryParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl HistoryQueryParams {
    /// Page size: default 100, at most 1000. Missing, non-numeric or
    /// non-positive values use the default; oversized ones, including
    /// values past `i64::MAX`, clamp to the maximum.
    pub fn limit(&self) -> usize {
        match parse_int(self.limit.as_deref()) {
            Some(n) if n > 0 => (n as u64).min(MAX_HISTORY_LIMIT as u64) as usize,
            _ => DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Rows to skip back from the newest entry. Missing, non-numeric or
    /// negative values mean 0.
    pub fn offset(&self) -> usize {
        match parse_int(self.offset.as_deref()) {
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            _ => 0,
        }
    }
}

/// Integers too large for `i64` saturate instead of counting as malformed
fn parse_int(raw: Option<&str>) -> Option<i64> {
    match raw?.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

/// GET /api/status - Buffer and uptime summary
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.feed.stats().await;

    Json(StatusResponse {
        status: "ok",
        uptime_ms: stats.uptime_ms,
        last_update_timestamp: stats.newest_timestamp,
        buffer_size: stats.count,
        buffer_max_size: stats.capacity,
        buffer_utilization_percent: stats.utilization_percent,
    })
}

/// GET /api/current - Latest snapshot
pub async fn get_current(
    State(state): State<AppState>,
) -> Result<Json<Arc<Snapshot>>, AppError> {
    state
        .feed
        .latest()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No data available yet".into()))
}

/// GET /api/history - Paginated history, newest page first
pub async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> Json<HistoryPage> {
    Json(state.feed.page(params.limit(), params.offset()).await)
}

/// GET /api/performance - Aggregate stats over the retained history
pub async fn get_performance(State(state): State<AppState>) -> Json<PerformanceReport> {
    Json(state.feed.performance().await)
}
