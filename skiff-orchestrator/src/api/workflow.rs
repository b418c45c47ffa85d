//! Workflow API Handlers
//!
//! A workflow is one task: its snapshot is the source of truth for progress
//! and failure.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use skiff_core::domain::log::LogEntry;
use skiff_core::domain::task::TaskSnapshot;
use skiff_engine::Engine;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::workflow_service;

/// GET /workflows/{id}
pub async fn get_workflow(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskSnapshot>> {
    tracing::debug!("Getting workflow: {}", id);
    Ok(Json(workflow_service::get_workflow(&engine, id).await?))
}

/// GET /workflows/{id}/logs
pub async fn get_logs(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(workflow_service::get_logs(&engine, id).await?))
}

/// POST /workflows/{id}/restart
pub async fn restart(State(engine): State<Engine>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    workflow_service::restart(&engine, id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /workflows/{id}/cancel
pub async fn cancel(State(engine): State<Engine>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    workflow_service::cancel(&engine, id).await?;
    Ok(StatusCode::ACCEPTED)
}
