//! Route handlers. Read endpoints serve the installed snapshot only; `/cost`
//! is the one uncached query.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::json_error;
use super::state::AppState;
use crate::cost::CostWindow;
use crate::error::{AppError, FetchError, RefreshError};
use crate::models::{CostSummary, Dataset, RefreshStats, ResourceClass};

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let last_refreshed = state.store.last_refreshed();
    Json(json!({
        "status": "ok",
        "provider": state.gateway.provider_name(),
        "snapshot_available": last_refreshed.is_some(),
        "last_refreshed": last_refreshed,
    }))
}

/// GET /resources
pub(crate) async fn handle_resources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let snap = state.store.current()?;
    let resources = snap.inventory.merged();
    Ok(Json(json!({
        "cycle": snap.cycle,
        "last_refreshed": snap.last_refreshed,
        "count": resources.len(),
        "degraded": snap.degraded,
        "resources": resources,
    })))
}

/// GET /ec2, /rds, /ebs, /cloudwatch-logs
pub(crate) async fn handle_class(
    State(state): State<Arc<AppState>>,
    class: ResourceClass,
) -> Result<Json<Value>, AppError> {
    let snap = state.store.current()?;
    let resources = snap.inventory.class(class);
    Ok(Json(json!({
        "class": class,
        "cycle": snap.cycle,
        "last_refreshed": snap.last_refreshed,
        "degraded": snap.degraded.contains(&Dataset::Resources(class)),
        "count": resources.len(),
        "resources": resources,
    })))
}

/// GET /cost-summary
pub(crate) async fn handle_cost_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CostSummary>, AppError> {
    let snap = state.store.current()?;
    Ok(Json(snap.cost.clone()))
}

/// GET /summary
pub(crate) async fn handle_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let snap = state.store.current()?;
    Ok(Json(serde_json::to_value(snap.as_ref())?))
}

/// POST /refresh -- blocks until the cycle (or the one already running)
/// completes.
pub(crate) async fn handle_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshStats>, AppError> {
    Ok(Json(state.controller.refresh_now().await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CostQuery {
    start: Option<String>,
    end: Option<String>,
}

/// GET /cost?start=YYYY-MM-DD&end=YYYY-MM-DD
pub(crate) async fn handle_cost(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CostQuery>,
) -> Result<Json<CostSummary>, AppError> {
    let window = CostWindow::from_query(
        query.start.as_deref(),
        query.end.as_deref(),
        state.cost_window_days,
    )?;
    let summary = tokio::time::timeout(state.request_deadline, state.gateway.fetch_costs(&window))
        .await
        .map_err(|_| {
            FetchError::new(
                "cost-and-usage",
                format!("no answer within {:?}", state.request_deadline),
            )
        })??;
    Ok(Json(summary))
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotYetAvailable => {
                let body = json!({ "error": self.to_string(), "available": false });
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Refresh(RefreshError::CostAborted(fetch)) => {
                let body = json!({ "error": self.to_string(), "dataset": fetch.target });
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        json_error(status, &self.to_string()).into_response()
    }
}
