//! Pipeline API Handlers

use axum::{Json, extract::State};
use skiff_core::dto::kube::PipelineSummary;
use skiff_engine::Engine;

use crate::service::pipeline_service;

/// GET /pipelines
pub async fn list_pipelines(State(engine): State<Engine>) -> Json<Vec<PipelineSummary>> {
    Json(pipeline_service::list_pipelines(&engine))
}
