//! Collaborator boundaries
//!
//! The orchestrator core never shells out directly: the batch scheduler
//! CLI, the cluster API, and the container registry sit behind narrow
//! traits so the core is testable with fakes. The real implementations in
//! this module perform process invocation at the boundary; any change in
//! an external tool's output format is isolated here.

mod kubectl;
mod registry;
mod slurm_cli;

pub use kubectl::Kubectl;
pub use registry::CliRegistryClient;
pub use slurm_cli::SlurmCli;

use std::io;
use std::path::Path;
use std::process::Command;

/// Errors from collaborator invocations
///
/// The backend's own error text is carried verbatim so operators can
/// diagnose backend-specific causes without orchestrator source access.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed: {stderr}")]
    Unavailable { program: String, stderr: String },

    #[error("registry authentication failed: {stderr}")]
    RegistryAuth { stderr: String },

    #[error("unrecognized {program} output: {output}")]
    MalformedOutput { program: String, output: String },
}

impl BackendError {
    /// Whether the failure is plausibly transient (backend unreachable or
    /// busy) as opposed to a config/compatibility defect.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

/// Point-in-time job status as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendJobStatus {
    /// Queued, not yet running
    Pending,
    /// At least one task is executing
    Running,
    /// Exited zero
    Completed,
    /// Exited non-zero or was killed; reason is the backend's own text
    Failed { reason: String },
    /// Cancelled by request
    Cancelled,
    /// The backend no longer knows the job
    NotFound,
}

/// Batch scheduler primitives (Slurm)
pub trait BatchBackend: Send + Sync {
    /// Submit a batch script; returns the backend-assigned job id
    fn submit(&self, script_path: &Path) -> Result<String, BackendError>;

    /// Query current job status (non-blocking point-in-time read)
    fn query(&self, job_id: &str) -> Result<BackendJobStatus, BackendError>;

    /// Cancel a job; cancelling an unknown or finished job is not an error
    fn cancel(&self, job_id: &str) -> Result<(), BackendError>;

    /// Hostnames available in a partition, for node discovery
    fn hostnames(&self, partition: Option<&str>) -> Result<Vec<String>, BackendError>;
}

/// Cluster API primitives (Kubernetes)
pub trait ClusterBackend: Send + Sync {
    /// Apply a manifest; returns the resource name
    fn apply(&self, manifest: &serde_json::Value) -> Result<String, BackendError>;

    /// Read a resource's status subresource
    fn read_status(&self, kind: &str, name: &str) -> Result<serde_json::Value, BackendError>;

    /// Delete a resource; deleting an absent resource is not an error
    fn delete(&self, kind: &str, name: &str) -> Result<(), BackendError>;
}

/// Container registry login primitive
pub trait RegistryClient: Send + Sync {
    /// Authenticate against the registry holding `image`
    fn login(&self, image: &str) -> Result<(), BackendError>;
}

/// Run a command, capturing output; non-zero exit maps to `Unavailable`
/// with the stderr text preserved verbatim.
pub(crate) fn run_checked(command: &mut Command) -> Result<String, BackendError> {
    let program = command.get_program().to_string_lossy().to_string();
    tracing::debug!(program = %program, "invoking backend CLI");

    let output = command.output().map_err(|source| BackendError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        tracing::debug!(
            program = %program,
            code = output.status.code().unwrap_or(-1),
            stderr = %stderr.trim(),
            "backend CLI failed"
        );
        return Err(BackendError::Unavailable {
            program,
            stderr: if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            },
        });
    }

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Unavailable {
            program: "sbatch".to_string(),
            stderr: "socket timed out".to_string(),
        }
        .is_transient());

        assert!(!BackendError::RegistryAuth {
            stderr: "denied".to_string()
        }
        .is_transient());

        assert!(!BackendError::MalformedOutput {
            program: "sbatch".to_string(),
            output: "???".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_run_checked_captures_stderr() {
        let err = run_checked(Command::new("sh").args(["-c", "echo boom >&2; exit 3"])).unwrap_err();
        match err {
            BackendError::Unavailable { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_checked_returns_stdout() {
        let out = run_checked(Command::new("sh").args(["-c", "echo ok"])).unwrap();
        assert_eq!(out.trim(), "ok");
    }
}
