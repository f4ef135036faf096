use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::history::ApiResponse;
use crate::models::network::Network;

#[derive(thiserror::Error, Debug)]
pub enum PodwatchError {
    #[error("upstream unavailable ({endpoint}): {reason}")]
    UpstreamUnavailable { endpoint: String, reason: String },
    #[error("invalid record: {0}")]
    RecordInvalid(String),
    #[error("cache write failed for {key}: {reason}")]
    CacheWriteFailed { key: String, reason: String },
    #[error("cache read failed for {key}: {reason}")]
    CacheReadFailed { key: String, reason: String },
    #[error("series store failed on {key}: {reason}")]
    SeriesFailed { key: String, reason: String },
    #[error("history write failed for {network}: {reason}")]
    HistoryWriteFailed { network: Network, reason: String },
    #[error("unauthorized")]
    AuthRejected,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, PodwatchError>;

impl PodwatchError {
    pub fn upstream(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PodwatchError::UpstreamUnavailable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

impl IntoResponse for PodwatchError {
    fn into_response(self) -> Response {
        let status_code = match self {
            PodwatchError::AuthRejected => StatusCode::UNAUTHORIZED,
            PodwatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PodwatchError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiResponse::<()>::failure(self.to_string());
        (status_code, Json(body)).into_response()
    }
}

/// Runs a best-effort side effect. Failures are logged and reported as `false`,
/// never propagated.
pub fn non_fatal<T>(label: &str, result: Result<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => {
            log::warn!("{label} failed (ignored): {err}");
            false
        }
    }
}
