//! Account API Handlers

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use skiff_core::domain::account::CloudAccount;
use skiff_engine::Engine;

use crate::api::error::ApiResult;
use crate::service::account_service;

/// POST /accounts
/// Store a cloud account; the response has its credentials redacted
pub async fn create_account(
    State(engine): State<Engine>,
    body: Result<Json<CloudAccount>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CloudAccount>)> {
    let Json(account) = body?;
    let account = account_service::create_account(engine.store(), account).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /accounts/{name}
pub async fn get_account(
    State(engine): State<Engine>,
    Path(name): Path<String>,
) -> ApiResult<Json<CloudAccount>> {
    Ok(Json(account_service::get_account(engine.store(), &name).await?))
}
