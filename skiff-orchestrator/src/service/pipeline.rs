//! Pipeline Service
//!
//! Read-only view of the pipeline registry.

use skiff_core::dto::kube::PipelineSummary;
use skiff_engine::Engine;

/// List every registered pipeline with its step names
pub fn list_pipelines(engine: &Engine) -> Vec<PipelineSummary> {
    engine.pipelines()
}
