//! Backend launchers
//!
//! A launcher takes a backend-neutral `LaunchPlan` plus a computed
//! `Topology` and turns them into backend-native artifacts, then drives
//! submit/poll/cancel through the collaborator traits in `backend`. The
//! orchestrator only ever talks to the `Launcher` trait, so both backends
//! stay behaviorally interchangeable.

mod kubernetes;
mod slurm;

pub use kubernetes::KubernetesLauncher;
pub use slurm::SlurmLauncher;

use std::io;
use std::path::{Path, PathBuf};

use crate::backend::BackendError;
use crate::plan::{
    LaunchPlan, MASTER_ADDR_PLACEHOLDER, MASTER_PORT_PLACEHOLDER, NNODES_PLACEHOLDER,
    NODE_RANK_PLACEHOLDER,
};
use crate::submission::BackendKind;
use crate::topology::Topology;

/// Single-quote a string for safe interpolation into generated shell
pub(crate) fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

const PLACEHOLDER_VARS: [(&str, &str); 4] = [
    (NODE_RANK_PLACEHOLDER, "$NODE_RANK"),
    (MASTER_ADDR_PLACEHOLDER, "$MASTER_ADDR"),
    (MASTER_PORT_PLACEHOLDER, "$MASTER_PORT"),
    (NNODES_PLACEHOLDER, "$NNODES"),
];

/// Quote one command token for the generated shell line. Literal text is
/// single-quoted so whitespace and metacharacters survive word
/// splitting; rendezvous placeholders become double-quoted variable
/// expansions spliced into the same word.
pub(crate) fn shell_token(token: &str) -> String {
    let mut out = String::new();
    let mut rest = token;
    while !rest.is_empty() {
        let next = PLACEHOLDER_VARS
            .iter()
            .filter_map(|(placeholder, var)| {
                rest.find(placeholder).map(|at| (at, *placeholder, *var))
            })
            .min_by_key(|(at, ..)| *at);
        match next {
            Some((at, placeholder, var)) => {
                if at > 0 {
                    out.push_str(&sh_quote(&rest[..at]));
                }
                out.push('"');
                out.push_str(var);
                out.push('"');
                rest = &rest[at + placeholder.len()..];
            }
            None => {
                out.push_str(&sh_quote(rest));
                rest = "";
            }
        }
    }
    if out.is_empty() {
        out.push_str("''");
    }
    out
}

/// A materialized, inspectable launch artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Slurm batch script (sbatch input)
    BatchScript(PathBuf),
    /// Per-node bootstrap script invoked by the batch script
    Bootstrap(PathBuf),
    /// Kubernetes manifest (JSON)
    Manifest(PathBuf),
}

impl Artifact {
    pub fn path(&self) -> &Path {
        match self {
            Artifact::BatchScript(path) | Artifact::Bootstrap(path) | Artifact::Manifest(path) => {
                path
            }
        }
    }
}

/// Errors while rendering or writing artifacts — fatal, never retried
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render manifest: {0}")]
    Render(#[from] serde_json::Error),
}

/// Errors while interacting with a backend after artifacts exist
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("materialize produced no {kind} artifact")]
    MissingArtifact { kind: &'static str },

    #[error("backend reported malformed status for {job_id}: {detail}")]
    MalformedStatus { job_id: String, detail: String },
}

impl SubmissionError {
    /// Transient errors are worth a bounded retry with backoff; everything
    /// else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            SubmissionError::Backend(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Point-in-time view of a submitted job, already mapped out of backend
/// vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Running,
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

/// One execution backend end to end
pub trait Launcher: Send + Sync {
    /// Which backend this launcher drives
    fn kind(&self) -> BackendKind;

    /// Candidate node hostnames for the plan, in backend order
    fn discover_nodes(&self, plan: &LaunchPlan) -> Result<Vec<String>, SubmissionError>;

    /// Render backend-native artifacts into `artifact_dir`
    fn materialize(
        &self,
        plan: &LaunchPlan,
        topology: &Topology,
        artifact_dir: &Path,
    ) -> Result<Vec<Artifact>, ArtifactError>;

    /// Submit materialized artifacts; returns the backend job id
    fn submit(&self, plan: &LaunchPlan, artifacts: &[Artifact])
        -> Result<String, SubmissionError>;

    /// Query current status of a submitted job
    fn poll(&self, backend_job_id: &str) -> Result<PollStatus, SubmissionError>;

    /// Cancel a submitted job; idempotent on finished or unknown jobs
    fn cancel(&self, backend_job_id: &str) -> Result<(), SubmissionError>;

    /// True when the backend's own controller restarts failed executions
    /// up to the plan's retry budget. A FAILED poll from such a backend
    /// already reflects a spent budget, so the orchestrator must not
    /// resubmit on top of it.
    fn delegates_execution_retries(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_token_quotes_literals_and_splices_placeholders() {
        assert_eq!(shell_token("--note"), "'--note'");
        assert_eq!(shell_token("hello world"), "'hello world'");
        assert_eq!(shell_token("$(reboot)"), "'$(reboot)'");
        assert_eq!(shell_token("it's"), r"'it'\''s'");
        assert_eq!(shell_token(""), "''");
        assert_eq!(shell_token("{NODE_RANK}"), "\"$NODE_RANK\"");
        assert_eq!(
            shell_token("addr={MASTER_ADDR}:{MASTER_PORT}"),
            "'addr='\"$MASTER_ADDR\"':'\"$MASTER_PORT\""
        );
    }

    #[test]
    fn test_transient_delegates_to_backend() {
        let transient = SubmissionError::Backend(BackendError::Unavailable {
            program: "sbatch".to_string(),
            stderr: "timeout".to_string(),
        });
        assert!(transient.is_transient());

        let auth = SubmissionError::Backend(BackendError::RegistryAuth {
            stderr: "denied".to_string(),
        });
        assert!(!auth.is_transient());

        let missing = SubmissionError::MissingArtifact { kind: "manifest" };
        assert!(!missing.is_transient());
    }
}
