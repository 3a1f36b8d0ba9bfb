//! Kubernetes launcher
//!
//! Materializes a PyTorchJob manifest for the Kubeflow training operator.
//! Worker pods get stable names `<resource>-worker-<i>`, so the node set
//! is known before submission and the coordinator can compute the
//! topology from predicted pod names. Rendezvous values are injected as
//! container environment; each pod derives its own rank from its ordinal
//! hostname suffix. Lexicographic and ordinal order diverge past ten
//! workers, but `worker-0` sorts first either way, so the master address
//! and world size the coordinator hands out agree with the in-pod ranks.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::backend::{ClusterBackend, RegistryClient};
use crate::job::VolumeSource;
use crate::plan::LaunchPlan;
use crate::submission::BackendKind;
use crate::topology::Topology;

use super::{shell_token, Artifact, ArtifactError, Launcher, PollStatus, SubmissionError};

const RESOURCE_KIND: &str = "pytorchjob";

/// Launcher that drives a Kubernetes cluster through the training operator
pub struct KubernetesLauncher {
    cluster: Box<dyn ClusterBackend>,
    registry: Box<dyn RegistryClient>,
}

impl KubernetesLauncher {
    pub fn new(cluster: Box<dyn ClusterBackend>, registry: Box<dyn RegistryClient>) -> Self {
        Self { cluster, registry }
    }
}

/// Deterministic resource name: job name plus a key prefix, so a changed
/// spec produces a new resource instead of silently mutating the old one.
pub(crate) fn resource_name(plan: &LaunchPlan) -> String {
    let prefix: String = plan.job_key.chars().take(8).collect();
    if prefix.is_empty() {
        plan.job_name.clone()
    } else {
        format!("{}-{}", plan.job_name, prefix)
    }
}

/// Predicted worker pod names, in ordinal order
pub(crate) fn worker_pod_names(plan: &LaunchPlan) -> Vec<String> {
    let resource = resource_name(plan);
    (0..plan.node_count)
        .map(|i| format!("{resource}-worker-{i}"))
        .collect()
}

/// Wrap the entry command so the pod derives its rank at startup from its
/// ordinal hostname suffix; the remaining rendezvous values come from the
/// container environment. Tokens are quoted one word apiece so user text
/// survives the `sh -c` evaluation intact.
fn shell_entry(plan: &LaunchPlan) -> String {
    let command: Vec<String> = std::iter::once(shell_token(&plan.command.program))
        .chain(plan.command.args.iter().map(|a| shell_token(a)))
        .collect();
    format!("NODE_RANK=${{HOSTNAME##*-}}; exec {}", command.join(" "))
}

fn volume_sources(plan: &LaunchPlan) -> Vec<Value> {
    plan.volumes
        .iter()
        .map(|volume| match &volume.source {
            VolumeSource::HostPath { path } => json!({
                "name": volume.name,
                "hostPath": {"path": path}
            }),
            VolumeSource::Pvc { claim_name } => json!({
                "name": volume.name,
                "persistentVolumeClaim": {"claimName": claim_name}
            }),
        })
        .collect()
}

pub(crate) fn render_manifest(plan: &LaunchPlan, topology: &Topology) -> Value {
    let resource = resource_name(plan);

    let mut env: Vec<Value> = vec![
        json!({"name": "MASTER_ADDR", "value": topology.master_addr}),
        json!({"name": "MASTER_PORT", "value": topology.master_port.to_string()}),
        json!({"name": "NNODES", "value": topology.world_size().to_string()}),
    ];
    for (key, value) in &plan.env {
        env.push(json!({"name": key, "value": value}));
    }

    let volume_mounts: Vec<Value> = plan
        .volumes
        .iter()
        .map(|v| json!({"name": v.name, "mountPath": v.mount_path}))
        .collect();

    let resource_key = plan.requirements.accelerator_kind.resource_key();
    let mut pod_spec = json!({
        "restartPolicy": "OnFailure",
        "containers": [{
            "name": "trainer",
            "image": plan.image,
            "command": ["/bin/sh", "-c", shell_entry(plan)],
            "env": env,
            "volumeMounts": volume_mounts,
            "resources": {
                "limits": {
                    (resource_key): plan.requirements.accelerators_per_node
                }
            }
        }],
        "volumes": volume_sources(plan)
    });

    if !plan.requirements.label_selector.is_empty() {
        pod_spec["nodeSelector"] = json!(plan.requirements.label_selector);
    }
    if let Some(priority_class) = &plan.requirements.priority_class {
        pod_spec["priorityClassName"] = json!(priority_class);
    }

    json!({
        "apiVersion": "kubeflow.org/v1",
        "kind": "PyTorchJob",
        "metadata": {
            "name": resource,
            "labels": {
                "app.kubernetes.io/managed-by": "trainlane",
                "trainlane/job-name": plan.job_name
            }
        },
        "spec": {
            "runPolicy": {
                // In-cluster restarts go through the operator's own
                // backoff; the Failed condition only appears once this
                // limit is spent.
                "backoffLimit": plan.requirements.max_retry,
                "activeDeadlineSeconds": u64::from(plan.requirements.time_limit_minutes) * 60
            },
            "pytorchReplicaSpecs": {
                "Worker": {
                    "replicas": plan.node_count,
                    "template": {"spec": pod_spec}
                }
            }
        }
    })
}

/// Latest condition of a PyTorchJob status whose status field is "True"
fn active_condition(status: &Value) -> Option<(&str, &str)> {
    let conditions = status.pointer("/status/conditions")?.as_array()?;
    conditions
        .iter()
        .rev()
        .find(|c| c.pointer("/status").and_then(Value::as_str) == Some("True"))
        .map(|c| {
            (
                c.pointer("/type").and_then(Value::as_str).unwrap_or(""),
                c.pointer("/message").and_then(Value::as_str).unwrap_or(""),
            )
        })
}

impl Launcher for KubernetesLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    fn discover_nodes(&self, plan: &LaunchPlan) -> Result<Vec<String>, SubmissionError> {
        Ok(worker_pod_names(plan))
    }

    fn materialize(
        &self,
        plan: &LaunchPlan,
        topology: &Topology,
        artifact_dir: &Path,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        let manifest = render_manifest(plan, topology);
        let path = artifact_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&path, json).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), "materialized manifest");
        Ok(vec![Artifact::Manifest(path)])
    }

    fn submit(
        &self,
        plan: &LaunchPlan,
        artifacts: &[Artifact],
    ) -> Result<String, SubmissionError> {
        self.registry.login(&plan.image)?;

        let path = artifacts
            .iter()
            .find_map(|a| match a {
                Artifact::Manifest(path) => Some(path),
                _ => None,
            })
            .ok_or(SubmissionError::MissingArtifact { kind: "manifest" })?;

        let json = fs::read_to_string(path).map_err(|source| {
            SubmissionError::Backend(crate::backend::BackendError::Spawn {
                program: "kubectl".to_string(),
                source,
            })
        })?;
        let manifest: Value =
            serde_json::from_str(&json).map_err(|e| SubmissionError::MalformedStatus {
                job_id: resource_name(plan),
                detail: e.to_string(),
            })?;

        Ok(self.cluster.apply(&manifest)?)
    }

    fn poll(&self, backend_job_id: &str) -> Result<PollStatus, SubmissionError> {
        let status = self.cluster.read_status(RESOURCE_KIND, backend_job_id)?;
        if status.is_null() {
            return Ok(PollStatus::Failed {
                reason: "resource not found".to_string(),
            });
        }

        Ok(match active_condition(&status) {
            Some(("Succeeded", _)) => PollStatus::Succeeded,
            Some(("Failed", message)) => PollStatus::Failed {
                reason: message.to_string(),
            },
            Some(("Running", _)) => PollStatus::Running,
            // Created, Restarting, Suspended, or no condition yet.
            _ => PollStatus::Pending,
        })
    }

    fn cancel(&self, backend_job_id: &str) -> Result<(), SubmissionError> {
        Ok(self.cluster.delete(RESOURCE_KIND, backend_job_id)?)
    }

    /// The operator restarts failed pods up to `backoffLimit`, which the
    /// manifest pins to the plan's retry budget.
    fn delegates_execution_retries(&self) -> bool {
        true
    }
}
