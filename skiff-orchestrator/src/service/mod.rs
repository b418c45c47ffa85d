//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the provisioning engine.

pub mod account;
pub mod kube;
pub mod pipeline;
pub mod workflow;

// Re-export for convenience
pub use account as account_service;
pub use kube as kube_service;
pub use pipeline as pipeline_service;
pub use workflow as workflow_service;
