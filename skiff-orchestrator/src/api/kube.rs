//! Kube API Handlers
//!
//! HTTP endpoints for cluster provisioning, scaling and teardown.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use skiff_core::domain::kube::Kube;
use skiff_core::dto::kube::KubeSummary;
use skiff_core::dto::provision::{AddNodesRequest, ProvisionRequest, ProvisionResponse, TasksResponse};
use skiff_engine::Engine;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::kube_service;

/// POST /provision
/// Validate a profile and start provisioning a cluster
pub async fn provision(
    State(engine): State<Engine>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProvisionResponse>)> {
    let Json(req) = body?;
    let response = kube_service::provision(&engine, req).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /kubes
pub async fn list_kubes(State(engine): State<Engine>) -> ApiResult<Json<Vec<KubeSummary>>> {
    tracing::debug!("Listing clusters");
    Ok(Json(kube_service::list_kubes(&engine).await?))
}

/// GET /kubes/{id}
pub async fn get_kube(State(engine): State<Engine>, Path(id): Path<Uuid>) -> ApiResult<Json<Kube>> {
    tracing::debug!("Getting cluster: {}", id);
    Ok(Json(kube_service::get_kube(&engine, id).await?))
}

/// DELETE /kubes/{id}
/// Start deleting a cluster; returns the deletion task ids
pub async fn delete_kube(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TasksResponse>)> {
    let tasks = kube_service::delete_kube(&engine, id).await?;
    Ok((StatusCode::ACCEPTED, Json(TasksResponse { tasks })))
}

/// POST /kubes/{id}/nodes
/// Join new workers to an operational cluster
pub async fn add_nodes(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
    body: Result<Json<AddNodesRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TasksResponse>)> {
    let Json(req) = body?;
    tracing::info!("Adding {} node(s) to cluster {}", req.nodes.len(), id);

    let tasks = kube_service::add_nodes(&engine, id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(TasksResponse { tasks })))
}

/// DELETE /kubes/{id}/nodes/{machine_id}
pub async fn delete_node(
    State(engine): State<Engine>,
    Path((id, machine_id)): Path<(Uuid, String)>,
) -> ApiResult<(StatusCode, Json<TasksResponse>)> {
    tracing::info!("Deleting node {} of cluster {}", machine_id, id);

    let tasks = kube_service::delete_node(&engine, id, &machine_id).await?;
    Ok((StatusCode::ACCEPTED, Json(TasksResponse { tasks })))
}
