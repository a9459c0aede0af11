use crate::errors::ApiError;
use crate::state::ApiState;
use axum::extract::{Query, State};
use axum::Json;
use crawlforge_types::{CorpusStats, DatabaseUsage, Progress};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub uptime_s: u64,
    pub active_session_id: Option<uuid::Uuid>,
}

/// `GET /health` (§4.9): liveness probe against the Store plus a glance at
/// Rotation Manager's database health. Never fails the request itself —
/// a Store error degrades the reported status to `down` rather than
/// returning a 5xx, so load balancers see a clean JSON body either way.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let probe = tokio::time::timeout(PROBE_TIMEOUT, state.store.load_progress()).await;

    let (status, active_session_id) = match probe {
        Ok(Ok(progress)) => {
            let all_down = state
                .rotation
                .snapshot()
                .iter()
                .all(|db| db.status == crawlforge_types::DatabaseStatus::Down);
            let status = if all_down {
                HealthState::Degraded
            } else {
                HealthState::Ok
            };
            (status, progress.and_then(|p| p.active_session_id))
        }
        Ok(Err(_)) | Err(_) => (HealthState::Down, None),
    };

    Json(HealthResponse {
        status,
        uptime_s: state.started_at.elapsed().as_secs(),
        active_session_id,
    })
}

/// `GET /progress` (§4.9): current Progress record, zero-initialized if
/// none has ever been committed.
pub async fn progress(State(state): State<ApiState>) -> Result<Json<Progress>, ApiError> {
    let progress = state
        .store
        .load_progress()
        .await?
        .unwrap_or_else(|| Progress::initial(1));
    Ok(Json(progress))
}

/// `GET /stats` (§4.9): aggregated counters over the full corpus.
pub async fn stats(State(state): State<ApiState>) -> Result<Json<CorpusStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

/// `GET /databases` (§4.9): Rotation Manager's live usage/health snapshot.
pub async fn databases(State(state): State<ApiState>) -> Json<Vec<DatabaseUsage>> {
    Json(state.rotation.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

/// `GET /logs?limit=N` (§4.9): the last `limit` formatted log lines held
/// in the in-process ring buffer, clamped to a max of 1000 regardless of
/// the buffer's own capacity.
pub async fn logs(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Json<LogsResponse> {
    Json(LogsResponse {
        lines: state.logs.recent(query.limit.min(1000)),
    })
}
