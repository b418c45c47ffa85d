//! Data Transfer Objects for the orchestrator HTTP surface

pub mod kube;
pub mod provision;
