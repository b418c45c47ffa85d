//! Workflow Service
//!
//! Task snapshots, their captured output, restart and cancellation.

use skiff_core::domain::log::LogEntry;
use skiff_core::domain::task::TaskSnapshot;
use skiff_engine::{Engine, ProvisionError};
use uuid::Uuid;

/// Service error type
#[derive(Debug)]
pub enum WorkflowError {
    NotFound(String),
    Conflict(String),
    EngineError(ProvisionError),
}

impl From<ProvisionError> for WorkflowError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::NotFound(what) => WorkflowError::NotFound(what),
            ProvisionError::Conflict(msg) => WorkflowError::Conflict(msg),
            other => WorkflowError::EngineError(other),
        }
    }
}

/// Get a task snapshot by ID
pub async fn get_workflow(engine: &Engine, id: Uuid) -> Result<TaskSnapshot, WorkflowError> {
    Ok(engine.get_task(id).await?)
}

/// Get the last flushed output of a task
pub async fn get_logs(engine: &Engine, id: Uuid) -> Result<Vec<LogEntry>, WorkflowError> {
    Ok(engine.task_logs(id).await?)
}

/// Resume a task from its first unfinished step
pub async fn restart(engine: &Engine, id: Uuid) -> Result<(), WorkflowError> {
    engine.restart(id).await?;
    tracing::info!("Task {} restarted", id);
    Ok(())
}

/// Cancel a running task
pub async fn cancel(engine: &Engine, id: Uuid) -> Result<(), WorkflowError> {
    engine.cancel(id).await?;
    tracing::info!("Task {} cancelled", id);
    Ok(())
}
