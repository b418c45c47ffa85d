//! Skiff Templates
//!
//! Shell script templates rendered by provisioning steps.
//!
//! Templates are plain bash with minijinja placeholders. A set of built-in
//! templates ships with the crate; a directory of `*.sh` files can override
//! any of them by file stem at startup.

pub mod builtin;
pub mod registry;

pub use registry::{TemplateError, TemplateRegistry};
