//! Slurm CLI backend
//!
//! Thin wrapper over the `sbatch`/`sacct`/`scancel`/`sinfo` binaries. All
//! parsing of their output lives here so the launcher only sees typed
//! results.

use std::path::Path;
use std::process::Command;

use super::{run_checked, BackendError, BackendJobStatus, BatchBackend};

/// Batch backend that drives the Slurm command-line tools
#[derive(Debug, Clone, Default)]
pub struct SlurmCli;

impl SlurmCli {
    pub fn new() -> Self {
        Self
    }
}

/// Map a Slurm state token to a job status. Slurm suffixes cancelled
/// states with the requesting user ("CANCELLED by 1000"), so match on the
/// leading token only.
fn parse_state(raw: &str) -> Option<BackendJobStatus> {
    let token = raw.split_whitespace().next()?;
    let token = token.trim_end_matches('+');
    match token {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => Some(BackendJobStatus::Pending),
        "RUNNING" | "COMPLETING" => Some(BackendJobStatus::Running),
        "COMPLETED" => Some(BackendJobStatus::Completed),
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "PREEMPTED" => {
            Some(BackendJobStatus::Failed {
                reason: raw.trim().to_string(),
            })
        }
        "CANCELLED" => Some(BackendJobStatus::Cancelled),
        _ => None,
    }
}

impl BatchBackend for SlurmCli {
    fn submit(&self, script_path: &Path) -> Result<String, BackendError> {
        let stdout = run_checked(
            Command::new("sbatch")
                .arg("--parsable")
                .arg(script_path),
        )?;

        // --parsable prints "jobid" or "jobid;cluster".
        let job_id = stdout
            .trim()
            .split(';')
            .next()
            .unwrap_or("")
            .to_string();
        if job_id.is_empty() || !job_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(BackendError::MalformedOutput {
                program: "sbatch".to_string(),
                output: stdout.trim().to_string(),
            });
        }

        tracing::info!(job_id = %job_id, "submitted batch job");
        Ok(job_id)
    }

    fn query(&self, job_id: &str) -> Result<BackendJobStatus, BackendError> {
        let stdout = run_checked(
            Command::new("sacct")
                .args(["-j", job_id, "-n", "-X", "-o", "State"]),
        )?;

        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
        match line {
            None => Ok(BackendJobStatus::NotFound),
            Some(raw) => parse_state(raw).ok_or_else(|| BackendError::MalformedOutput {
                program: "sacct".to_string(),
                output: raw.to_string(),
            }),
        }
    }

    fn cancel(&self, job_id: &str) -> Result<(), BackendError> {
        match run_checked(Command::new("scancel").arg(job_id)) {
            Ok(_) => Ok(()),
            // scancel on an already-finished or unknown job is a no-op.
            Err(BackendError::Unavailable { stderr, .. })
                if stderr.contains("Invalid job id") =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn hostnames(&self, partition: Option<&str>) -> Result<Vec<String>, BackendError> {
        let mut command = Command::new("sinfo");
        command.args(["-h", "-N", "-o", "%N"]);
        if let Some(partition) = partition {
            command.args(["-p", partition]);
        }
        let stdout = run_checked(&mut command)?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
