//! Result type aliases for depot.

use crate::DepotError;

/// A specialized `Result` type for depot operations.
pub type DepotResult<T> = Result<T, DepotError>;
