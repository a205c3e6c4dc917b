//! Error types for arm control.

use std::time::Duration;

use thiserror::Error;

use crate::bus::BusError;

/// Errors that end an arm operation.
///
/// Per-joint bus failures are normally logged and skipped; they only show up
/// here as [`ArmError::JointStep`] when the controller runs with
/// [`FailurePolicy::Abort`](crate::config::FailurePolicy::Abort).
#[derive(Debug, Error)]
pub enum ArmError {
    /// The bus refused the configured baud rate.
    #[error("bus rejected baud rate {baud_rate}")]
    BusConfig { baud_rate: u32 },

    /// The serial port could not be opened.
    #[error("failed to open port {port}: {reason}")]
    PortOpen { port: String, reason: String },

    /// A per-joint bus operation failed and the failure policy is abort.
    #[error("joint {id}: {operation} failed: {source}")]
    JointStep {
        id: u8,
        operation: &'static str,
        #[source]
        source: BusError,
    },

    /// Some joints were still moving (or unreadable) when the convergence
    /// bound ran out.
    #[error("arm did not settle after {passes} passes ({elapsed:?}), still moving: {moving:?}")]
    ConvergenceTimeout {
        passes: u32,
        elapsed: Duration,
        moving: Vec<u8>,
    },

    /// A pose does not have one angle per joint.
    #[error("pose has {got} angles, arm has {expected} joints")]
    PoseLength { expected: usize, got: usize },

    /// Malformed pose input.
    #[error("invalid pose input: {0}")]
    Input(String),

    /// Invalid arm configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ArmError {
    /// Create an Input error with a message.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a Config error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
