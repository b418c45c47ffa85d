//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use skiff_engine::{ProvisionError, StoreError};

use crate::service::account::AccountError;
use crate::service::kube::KubeError;
use crate::service::workflow::WorkflowError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    StoreError(StoreError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::NotFound(what) => ApiError::NotFound(what),
            ProvisionError::Validation(msg) => ApiError::BadRequest(msg),
            ProvisionError::Conflict(msg) => ApiError::Conflict(msg),
            ProvisionError::Store(err) => ApiError::StoreError(err),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<KubeError> for ApiError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::NotFound(what) => ApiError::NotFound(what),
            KubeError::ValidationError(msg) => ApiError::BadRequest(msg),
            KubeError::Conflict(msg) => ApiError::Conflict(msg),
            KubeError::EngineError(err) => err.into(),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(what) => ApiError::NotFound(what),
            WorkflowError::Conflict(msg) => ApiError::Conflict(msg),
            WorkflowError::EngineError(err) => err.into(),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(what) => ApiError::NotFound(what),
            AccountError::ValidationError(msg) => ApiError::BadRequest(msg),
            AccountError::StoreError(err) => ApiError::StoreError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
