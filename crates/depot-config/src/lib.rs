//! # Depot Config
//!
//! Configuration management for depot.
//! Supports layered configuration from files and environment variables,
//! validation, and runtime reload.

mod app_config;
mod loader;
mod policy;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use policy::*;
pub use validation::*;
