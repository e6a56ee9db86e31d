//! # Depot Core
//!
//! Core types and error definitions shared by the depot crates.
//! Provides the workspace-wide error type, result aliases, run identifiers
//! and tracing initialisation.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use id::*;
pub use result::*;
