//! Skiff Engine
//!
//! Provisions Kubernetes clusters as sets of resumable tasks.
//!
//! This crate contains:
//! - Store: the key-value contract and the typed repositories on top of it
//! - Steps and pipelines: the units of work and their ordered lists
//! - Tasks: a pipeline run over one shared config, snapshotted per step
//! - Engine: cluster-level operations (provision, scale, teardown, restart)

pub mod cloud;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod repository;
pub mod settings;
pub mod steps;
pub mod store;
pub mod task;
pub mod token;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use engine::{Engine, ProvisionError, REDACTED};
pub use settings::{EngineSettings, Timeouts};
pub use steps::Services;
pub use store::{MemoryStore, Store, StoreError};
