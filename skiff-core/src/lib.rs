//! Skiff Core
//!
//! Core types shared by every Skiff crate.
//!
//! This crate contains:
//! - Domain types: profiles, machines, clusters, task snapshots, accounts
//! - DTOs: request/response bodies of the orchestrator HTTP surface

pub mod domain;
pub mod dto;
