//! Error types for the attendant supervisor.
//!
//! Stage action failures never surface through these types: they are
//! captured into the stage record instead. What remains are construction
//! errors, configuration errors and internal faults that a monitor tick
//! downgrades into a degraded status.

use std::time::Duration;
use thiserror::Error;

/// The main error type for attendant operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttendantError {
    /// Stage not present in the topology.
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    /// Duplicate stage in the topology.
    #[error("Duplicate stage: {0}")]
    DuplicateStage(String),

    /// Topology structure is invalid.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A stage has no bound action.
    #[error("No action bound to stage: {0}")]
    MissingAction(String),

    /// Error raised while executing a stage action.
    #[error("Stage execution error: {0}")]
    StageExecution(String),

    /// Error raised by the browser driver.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`Driver`](crate::Driver) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The call did not finish within the configured timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The driver operation that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Page navigation failed.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// The requested URL.
        url: String,
        /// Why navigation failed.
        reason: String,
    },

    /// A handle no longer refers to a live element.
    #[error("element is detached: {0}")]
    Detached(String),

    /// Any other driver failure.
    #[error("{0}")]
    Operation(String),
}

/// A specialized `Result` type for attendant operations.
pub type Result<T> = std::result::Result<T, AttendantError>;
