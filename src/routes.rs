use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::commands::collect::{CleanupReport, CollectionSummary};
use crate::commands::db::Metric;
use crate::commands::query::HistoryRange;
use crate::error::{PodwatchError, Result};
use crate::models::history::{Aggregate, ApiResponse, NodeHistory, Overview, PodHistory};
use crate::models::network::Network;
use crate::models::node::{NetworkStats, NodeRecord, NodeStatus};
use crate::state::AppState;

const DEFAULT_OVERVIEW_LIMIT: usize = 10;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analytics/collect", post(collect))
        .route("/api/analytics/overview", get(overview))
        .route("/api/analytics/node/{pubkey}", get(node_history))
        .route("/api/analytics/pod/{pod_id}", get(pod_history))
        .route("/api/analytics/aggregate/{entity}", get(aggregate))
        .route("/api/pnodes", get(pnodes))
        .route("/api/cron/cleanup", post(cleanup))
        .route("/api/cron/init-expirations", post(init_expirations))
        .with_state(state)
}

/// Bearer check for scheduled triggers. An unset secret rejects everything.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Err(PodwatchError::AuthRejected);
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == secret => Ok(()),
        _ => Err(PodwatchError::AuthRejected),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    network: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    period: Option<String>,
    metric: Option<String>,
}

impl HistoryParams {
    fn range(&self) -> Result<HistoryRange> {
        Ok(HistoryRange {
            start: parse_opt(self.start_time.as_deref(), "startTime")?,
            end: parse_opt(self.end_time.as_deref(), "endTime")?,
            period: self.period.clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OverviewParams {
    network: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PnodesParams {
    network: Option<String>,
    status: Option<String>,
    min_score: Option<String>,
    cache: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    success: bool,
    message: String,
    stats: CollectionSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnodesResponse {
    success: bool,
    data: Vec<NodeRecord>,
    count: usize,
    stats: NetworkStats,
    cached: bool,
    network: Network,
    timestamp: i64,
}

fn parse_network(raw: Option<&str>) -> Result<Network> {
    raw.unwrap_or("devnet").parse().map_err(PodwatchError::BadRequest)
}

fn parse_opt<T: std::str::FromStr>(raw: Option<&str>, name: &str) -> Result<Option<T>> {
    raw.filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| PodwatchError::BadRequest(format!("Invalid {name}: {v}")))
        })
        .transpose()
}

// POST /api/analytics/collect
async fn collect(State(ctx): State<AppState>, headers: HeaderMap) -> Result<Json<CollectResponse>> {
    authorize(&headers, ctx.cron_secret.as_deref())?;
    let summary = ctx.collector.run_all().await;
    Ok(Json(CollectResponse {
        success: true,
        message: "Analytics data collected successfully".to_string(),
        stats: summary,
    }))
}

// GET /api/analytics/overview
async fn overview(
    State(ctx): State<AppState>,
    Query(params): Query<OverviewParams>,
) -> Result<Json<ApiResponse<Overview>>> {
    let network = parse_network(params.network.as_deref())?;
    let limit = parse_opt(params.limit.as_deref(), "limit")?.unwrap_or(DEFAULT_OVERVIEW_LIMIT);
    Ok(Json(ApiResponse::ok(ctx.query.overview(network, limit)?)))
}

// GET /api/analytics/node/{pubkey}
async fn node_history(
    State(ctx): State<AppState>,
    Path(pubkey): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse<NodeHistory>>> {
    let network = parse_network(params.network.as_deref())?;
    let history = ctx.query.node_history(network, &pubkey, &params.range()?)?;

    let empty = history.history.is_empty();
    let response = ApiResponse::ok(history);
    Ok(Json(if empty {
        response.with_message("No historical data available for this node")
    } else {
        response
    }))
}

// GET /api/analytics/pod/{pod_id}
async fn pod_history(
    State(ctx): State<AppState>,
    Path(pod_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse<PodHistory>>> {
    let network = parse_network(params.network.as_deref())?;
    let history = ctx.query.pod_history(network, &pod_id, &params.range()?)?;

    let empty = history.history.is_empty();
    let response = ApiResponse::ok(history);
    Ok(Json(if empty {
        response.with_message("No historical data available for this pod")
    } else {
        response
    }))
}

// GET /api/analytics/aggregate/{entity}
async fn aggregate(
    State(ctx): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse<Option<Aggregate>>>> {
    let network = parse_network(params.network.as_deref())?;
    let metric: Metric = params
        .metric
        .as_deref()
        .unwrap_or("score")
        .parse()
        .map_err(PodwatchError::BadRequest)?;
    let result = ctx.query.aggregate(network, metric, &entity, &params.range()?)?;
    Ok(Json(ApiResponse::ok(result)))
}

// GET /api/pnodes
async fn pnodes(
    State(ctx): State<AppState>,
    Query(params): Query<PnodesParams>,
) -> Result<Json<PnodesResponse>> {
    let network = parse_network(params.network.as_deref())?;
    let min_score: Option<f64> = parse_opt(params.min_score.as_deref(), "minScore")?;
    let status = match params.status.as_deref() {
        None | Some("all") | Some("") => None,
        Some(raw) => Some(parse_status(raw)?),
    };
    let use_cache = params.cache.as_deref() != Some("false");

    let cached = if use_cache {
        ctx.cache.get_roster(network).map(|records| {
            let stats = ctx.cache.get_stats(network).unwrap_or_default();
            (records, stats)
        })
    } else {
        None
    };

    let (records, stats, from_cache) = match cached {
        Some((records, stats)) => (records, stats, true),
        None => {
            let (records, stats) = ctx.collector.refresh_roster(network, !use_cache).await?;
            (records, stats, false)
        }
    };

    let data: Vec<NodeRecord> = records
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .filter(|r| min_score.map_or(true, |min| r.score >= min))
        .collect();

    Ok(Json(PnodesResponse {
        success: true,
        count: data.len(),
        data,
        stats,
        cached: from_cache,
        network,
        timestamp: ctx.clock.now_ms(),
    }))
}

// POST /api/cron/cleanup
async fn cleanup(State(ctx): State<AppState>, headers: HeaderMap) -> Result<Json<ApiResponse<CleanupReport>>> {
    authorize(&headers, ctx.cron_secret.as_deref())?;
    let report = ctx.collector.cleanup()?;
    Ok(Json(ApiResponse::ok(report).with_message("Cleanup completed")))
}

// POST /api/cron/init-expirations
async fn init_expirations(
    State(ctx): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<usize>>> {
    authorize(&headers, ctx.cron_secret.as_deref())?;
    let refreshed = ctx.collector.init_expirations()?;
    Ok(Json(ApiResponse::ok(refreshed).with_message("Expirations initialized")))
}

fn parse_status(raw: &str) -> Result<NodeStatus> {
    NodeStatus::ALL
        .into_iter()
        .find(|status| status.as_str() == raw)
        .ok_or_else(|| PodwatchError::BadRequest(format!("Invalid status: {raw}")))
}
