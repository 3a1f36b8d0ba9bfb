//! Slurm launcher
//!
//! Materializes a batch script plus a per-node bootstrap script. The
//! bootstrap recomputes the rank assignment at runtime from the
//! lexicographically sorted allocation nodelist, which agrees with the
//! coordinator's assignment for the same node set, so every node derives
//! the same master without any cross-node communication.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::backend::{BackendJobStatus, BatchBackend, RegistryClient};
use crate::job::VolumeSource;
use crate::plan::{AcceleratorKind, LaunchPlan};
use crate::submission::BackendKind;
use crate::topology::Topology;

use super::{sh_quote, shell_token, Artifact, ArtifactError, Launcher, PollStatus, SubmissionError};

/// Launcher that drives a Slurm cluster through its CLI tools
pub struct SlurmLauncher {
    batch: Box<dyn BatchBackend>,
    registry: Box<dyn RegistryClient>,
}

impl SlurmLauncher {
    pub fn new(batch: Box<dyn BatchBackend>, registry: Box<dyn RegistryClient>) -> Self {
        Self { batch, registry }
    }
}

/// Backend resource name: job name plus a key prefix so resubmissions of
/// a changed spec are distinguishable in squeue output.
fn slurm_job_name(plan: &LaunchPlan) -> String {
    let prefix: String = plan.job_key.chars().take(8).collect();
    if prefix.is_empty() {
        plan.job_name.clone()
    } else {
        format!("{}-{}", plan.job_name, prefix)
    }
}

fn minutes_as_slurm_time(minutes: u32) -> String {
    format!("{}:{:02}:00", minutes / 60, minutes % 60)
}

/// The container command, one quoted word per token, with rendezvous
/// placeholders rewritten to the shell variables the bootstrap computes
/// at runtime.
fn shell_args(plan: &LaunchPlan) -> Vec<String> {
    std::iter::once(shell_token(&plan.command.program))
        .chain(plan.command.args.iter().map(|a| shell_token(a)))
        .collect()
}

fn render_batch_script(plan: &LaunchPlan, bootstrap_path: &Path) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "#SBATCH --job-name={}", slurm_job_name(plan));
    let _ = writeln!(script, "#SBATCH --nodes={}", plan.node_count);
    let _ = writeln!(script, "#SBATCH --ntasks-per-node=1");
    if plan.requirements.exclusive {
        let _ = writeln!(script, "#SBATCH --exclusive");
    }
    let _ = writeln!(
        script,
        "#SBATCH --time={}",
        minutes_as_slurm_time(plan.requirements.time_limit_minutes)
    );
    if let Some(queue) = &plan.requirements.queue {
        let _ = writeln!(script, "#SBATCH --partition={queue}");
    }
    let _ = writeln!(script, "#SBATCH --output={}-%j.out", plan.job_name);
    let _ = writeln!(script);
    let _ = writeln!(script, "srun bash {}", sh_quote(&bootstrap_path.display().to_string()));
    script
}

fn render_bootstrap(plan: &LaunchPlan, topology: &Topology) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "set -euo pipefail");
    let _ = writeln!(script);
    let _ = writeln!(
        script,
        "# Rank assignment: sorted allocation nodelist, rank = index."
    );
    let _ = writeln!(
        script,
        "mapfile -t NODES < <(scontrol show hostnames \"$SLURM_JOB_NODELIST\" | sort)"
    );
    let _ = writeln!(script, "NNODES=${{#NODES[@]}}");
    let _ = writeln!(script, "SELF=$(hostname -s)");
    let _ = writeln!(script, "NODE_RANK=-1");
    let _ = writeln!(script, "for i in \"${{!NODES[@]}}\"; do");
    let _ = writeln!(
        script,
        "  [ \"${{NODES[$i]}}\" = \"$SELF\" ] && NODE_RANK=$i"
    );
    let _ = writeln!(script, "done");
    let _ = writeln!(script, "if [ \"$NODE_RANK\" -lt 0 ]; then");
    let _ = writeln!(
        script,
        "  echo \"node $SELF not in allocation\" >&2; exit 1"
    );
    let _ = writeln!(script, "fi");
    let _ = writeln!(script, "MASTER_ADDR=${{NODES[0]}}");
    let _ = writeln!(script, "MASTER_PORT={}", topology.master_port);
    let _ = writeln!(script);
    let _ = writeln!(
        script,
        "CONTAINER={}-\"$SLURM_JOB_ID\"",
        sh_quote(&plan.job_name)
    );
    let _ = writeln!(
        script,
        "cleanup() {{ docker rm -f \"$CONTAINER\" >/dev/null 2>&1 || true; }}"
    );
    let _ = writeln!(script, "trap cleanup EXIT TERM INT");
    let _ = writeln!(script);
    let _ = writeln!(script, "docker pull {}", sh_quote(&plan.image));
    let _ = writeln!(script);
    let _ = writeln!(script, "docker run --rm --name \"$CONTAINER\" \\");
    let _ = writeln!(script, "  --network host \\");

    match plan.requirements.accelerator_kind {
        AcceleratorKind::Gpu => {
            let _ = writeln!(script, "  --gpus all \\");
        }
        AcceleratorKind::Trainium => {
            for i in 0..plan.requirements.accelerators_per_node {
                let _ = writeln!(script, "  --device=/dev/neuron{i} \\");
            }
        }
    }

    for (key, value) in &plan.env {
        let _ = writeln!(script, "  -e {} \\", sh_quote(&format!("{key}={value}")));
    }
    if !plan.requirements.network_interfaces.is_empty() {
        let _ = writeln!(
            script,
            "  -e {} \\",
            sh_quote(&format!(
                "NCCL_SOCKET_IFNAME={}",
                plan.requirements.network_interfaces.join(",")
            ))
        );
    }

    for volume in &plan.volumes {
        match &volume.source {
            VolumeSource::HostPath { path } => {
                let _ = writeln!(
                    script,
                    "  -v {} \\",
                    sh_quote(&format!("{}:{}", path, volume.mount_path))
                );
            }
            VolumeSource::Pvc { claim_name } => {
                // Claim-backed volumes have no host-path equivalent.
                tracing::warn!(
                    volume = %volume.name,
                    claim = %claim_name,
                    "skipping claim-backed volume on the batch backend"
                );
            }
        }
    }

    let _ = writeln!(script, "  {} \\", sh_quote(&plan.image));
    let args = shell_args(plan);
    let _ = writeln!(script, "  {}", args.join(" "));
    script
}

fn write_artifact(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    fs::write(path, contents).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Launcher for SlurmLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::Slurm
    }

    fn discover_nodes(&self, plan: &LaunchPlan) -> Result<Vec<String>, SubmissionError> {
        let mut hostnames = self
            .batch
            .hostnames(plan.requirements.queue.as_deref())?;
        hostnames.sort();
        hostnames.dedup();
        hostnames.truncate(plan.node_count as usize);
        Ok(hostnames)
    }

    fn materialize(
        &self,
        plan: &LaunchPlan,
        topology: &Topology,
        artifact_dir: &Path,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        let bootstrap_path = artifact_dir.join("bootstrap.sh");
        let batch_path = artifact_dir.join("job.sbatch");

        write_artifact(&bootstrap_path, &render_bootstrap(plan, topology))?;
        write_artifact(&batch_path, &render_batch_script(plan, &bootstrap_path))?;

        tracing::info!(
            dir = %artifact_dir.display(),
            "materialized batch artifacts"
        );
        Ok(vec![
            Artifact::BatchScript(batch_path),
            Artifact::Bootstrap(bootstrap_path),
        ])
    }

    fn submit(
        &self,
        plan: &LaunchPlan,
        artifacts: &[Artifact],
    ) -> Result<String, SubmissionError> {
        self.registry.login(&plan.image)?;

        let script = artifacts
            .iter()
            .find_map(|a| match a {
                Artifact::BatchScript(path) => Some(path),
                _ => None,
            })
            .ok_or(SubmissionError::MissingArtifact {
                kind: "batch script",
            })?;

        Ok(self.batch.submit(script)?)
    }

    fn poll(&self, backend_job_id: &str) -> Result<PollStatus, SubmissionError> {
        let status = self.batch.query(backend_job_id)?;
        Ok(match status {
            BackendJobStatus::Pending => PollStatus::Pending,
            BackendJobStatus::Running => PollStatus::Running,
            BackendJobStatus::Completed => PollStatus::Succeeded,
            BackendJobStatus::Failed { reason } => PollStatus::Failed { reason },
            BackendJobStatus::Cancelled => PollStatus::Cancelled,
            BackendJobStatus::NotFound => PollStatus::Failed {
                reason: "job not found by backend".to_string(),
            },
        })
    }

    fn cancel(&self, backend_job_id: &str) -> Result<(), SubmissionError> {
        Ok(self.batch.cancel(backend_job_id)?)
    }
}
