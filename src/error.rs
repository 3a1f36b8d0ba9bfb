//! Top-level error aggregate
//!
//! Every phase error converts into `LaunchError` at the orchestrator
//! boundary, and each class maps to a stable process exit code so
//! wrapping automation can react without parsing messages.

use thiserror::Error;

use crate::config::ConfigError;
use crate::launcher::{ArtifactError, SubmissionError};
use crate::stage::StageError;
use crate::submission::StateError;
use crate::topology::TopologyError;

/// Launch pipeline errors
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("retry budget exhausted after {attempts} attempts: {last_failure}")]
    RetriesExhausted {
        attempts: u32,
        last_failure: String,
    },

    #[error("job failed: {0}")]
    ExecutionFailed(String),

    #[error("no submission record found for job {0}")]
    RecordNotFound(String),
}

impl LaunchError {
    /// Stable exit code per error class
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Config(_) => 1,
            LaunchError::Stage(_) => 10,
            LaunchError::Topology(_) => 20,
            LaunchError::Artifact(_) => 30,
            LaunchError::Submission(_) => 40,
            LaunchError::State(_) => 50,
            LaunchError::RetriesExhausted { .. } => 60,
            LaunchError::ExecutionFailed(_) => 70,
            LaunchError::RecordNotFound(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(
            LaunchError::Config(ConfigError::MissingField("image")).exit_code(),
            1
        );
        assert_eq!(
            LaunchError::RetriesExhausted {
                attempts: 2,
                last_failure: "NODE_FAIL".to_string()
            }
            .exit_code(),
            60
        );
        assert_eq!(
            LaunchError::ExecutionFailed("oom".to_string()).exit_code(),
            70
        );
        assert_eq!(
            LaunchError::RecordNotFound("llama-ft".to_string()).exit_code(),
            2
        );
    }
}
