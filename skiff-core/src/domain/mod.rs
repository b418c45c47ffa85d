//! Core domain types
//!
//! These types are persisted by the engine (as JSON in the key-value store)
//! and returned as-is by the HTTP surface, so their serialized shape is part
//! of the public contract. Field names are camelCase on the wire.

pub mod account;
pub mod kube;
pub mod log;
pub mod machine;
pub mod profile;
pub mod provider;
pub mod task;
