//! Resolved job specification and job_key computation
//!
//! A `JobSpec` is the fully-resolved, backend-agnostic description of one
//! training job, produced by the config resolver. The job_key is computed
//! over the output-affecting fields using RFC 8785 JSON Canonicalization
//! Scheme (JCS), so the same resolved spec always yields the same key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::config::ConfigError;

/// Schema version for job.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for job.json
pub const SCHEMA_ID: &str = "trainlane/job@1";

/// Maximum job name length (shared limit of Slurm job names and
/// Kubernetes resource names)
pub const MAX_JOB_NAME_LEN: usize = 63;

fn job_name_pattern() -> &'static regex_lite::Regex {
    static RE: OnceLock<regex_lite::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex_lite::Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$")
            .unwrap_or_else(|_| unreachable!("job name pattern is valid"))
    })
}

/// Backing storage for a mounted volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VolumeSource {
    /// Directory on the node's filesystem
    #[serde(rename = "hostPath")]
    HostPath { path: String },

    /// Kubernetes persistent volume claim
    #[serde(rename = "pvc")]
    Pvc { claim_name: String },
}

/// A volume mounted into every training container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name (unique within the job)
    pub name: String,

    /// Path inside the container
    pub mount_path: String,

    /// Backing storage
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// Scheduler placement hints, passed through to the backend unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerHints {
    /// Queue / partition name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Priority class name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,

    /// Node label selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

/// Fully-resolved, backend-agnostic job description
///
/// Owned by the caller and handed by value into the stage compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Job name: lowercase alphanumeric with internal hyphens, 1-63 chars
    pub job_name: String,

    /// Container image reference
    pub image: String,

    /// Entry script inside the container
    pub entry_script: String,

    /// Arguments passed to the entry script
    pub script_args: Vec<String>,

    /// Number of nodes
    pub node_count: u32,

    /// Training processes per node
    pub tasks_per_node: u32,

    /// Instance / accelerator type (e.g. "p5.48xlarge", "trn1.32xlarge")
    pub instance_type: String,

    /// Environment shared by all ranks (keys unique by construction)
    pub env: BTreeMap<String, String>,

    /// Volume mounts
    pub volumes: Vec<VolumeMount>,

    /// Scheduler placement hints
    pub hints: SchedulerHints,

    /// Maximum number of execution retries
    pub max_retry: u32,

    /// Checkpoint path to resume from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from_checkpoint: Option<String>,

    /// Rendezvous port for rank 0
    pub master_port: u16,

    /// Wall-clock limit for one execution attempt, in minutes
    pub time_limit_minutes: u32,
}

/// Output-affecting fields hashed to produce the job_key
///
/// Host-only operational settings (retry budget, time limit) are
/// deliberately excluded: they do not change what the job computes.
#[derive(Debug, Clone, Serialize)]
struct JobKeyInputs<'a> {
    job_name: &'a str,
    image: &'a str,
    entry_script: &'a str,
    script_args: &'a [String],
    node_count: u32,
    tasks_per_node: u32,
    instance_type: &'a str,
    env: &'a BTreeMap<String, String>,
    volumes: &'a [VolumeMount],
}

impl JobSpec {
    /// Validate the invariants the resolver guarantees
    ///
    /// Re-checkable independently of the resolver, so specs handed in by
    /// an SDK caller go through the same gate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_name.is_empty() {
            return Err(ConfigError::MissingField("job_name"));
        }
        if self.image.is_empty() {
            return Err(ConfigError::MissingField("image"));
        }
        if self.job_name.len() > MAX_JOB_NAME_LEN || !job_name_pattern().is_match(&self.job_name) {
            return Err(ConfigError::InvalidJobName {
                name: self.job_name.clone(),
            });
        }
        if self.node_count == 0 {
            return Err(ConfigError::NonPositiveCount { field: "node_count" });
        }
        if self.tasks_per_node == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "tasks_per_node",
            });
        }
        for volume in &self.volumes {
            match &volume.source {
                VolumeSource::HostPath { path } if path.is_empty() => {
                    return Err(ConfigError::InvalidVolume {
                        name: volume.name.clone(),
                        reason: "hostPath volume requires a non-empty path".to_string(),
                    });
                }
                VolumeSource::Pvc { claim_name } if claim_name.is_empty() => {
                    return Err(ConfigError::InvalidVolume {
                        name: volume.name.clone(),
                        reason: "pvc volume requires a non-empty claim_name".to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compute the job_key: SHA-256 hex digest of JCS(output-affecting fields)
    pub fn job_key(&self) -> Result<String, ConfigError> {
        let inputs = JobKeyInputs {
            job_name: &self.job_name,
            image: &self.image,
            entry_script: &self.entry_script,
            script_args: &self.script_args,
            node_count: self.node_count,
            tasks_per_node: self.tasks_per_node,
            instance_type: &self.instance_type,
            env: &self.env,
            volumes: &self.volumes,
        };
        let jcs = serde_json_canonicalizer::to_vec(&inputs)
            .map_err(|e| ConfigError::Canonicalization(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
