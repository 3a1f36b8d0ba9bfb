//! Recipe layering and resolution into a JobSpec
//!
//! A `Recipe` is one configuration layer with every field optional. Three
//! layers merge into one fully-resolved `JobSpec`:
//!
//! 1. base recipe defaults
//! 2. cluster-type overrides
//! 3. user overrides (highest precedence)
//!
//! `resolve` is a pure function: all inputs are already-materialized
//! structures, and the same layers always produce the same JobSpec. File
//! loading exists only for the CLI and never runs inside the resolver.

mod defaults;
mod merge;

pub use defaults::{BuiltinDefaults, DEFAULT_CONTAINER_WORKDIR, DEFAULT_MASTER_PORT};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::job::{JobSpec, SchedulerHints, VolumeMount, VolumeSource, SCHEMA_ID, SCHEMA_VERSION};

/// Configuration errors — always fatal, never retried
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required field {0} is missing after merge")]
    MissingField(&'static str),

    #[error("invalid job name {name:?}: must be lowercase alphanumeric with internal hyphens, 1-63 chars")]
    InvalidJobName { name: String },

    #[error("invalid volume {name:?}: {reason}")]
    InvalidVolume { name: String, reason: String },

    #[error("{field} must be at least 1")]
    NonPositiveCount { field: &'static str },

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
}

/// Loosely-typed volume entry as written in a recipe layer
///
/// The per-type required field (`path` for hostPath, `claim_name` for pvc)
/// is checked during resolution; a violation is a `ConfigError` and the
/// spec never reaches a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name
    pub name: String,

    /// Volume type: "hostPath" or "pvc"
    #[serde(rename = "type")]
    pub kind: String,

    /// Path inside the container
    pub mount_path: String,

    /// Host path (hostPath volumes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Claim name (pvc volumes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

impl VolumeSpec {
    fn into_mount(self) -> Result<VolumeMount, ConfigError> {
        let source = match self.kind.as_str() {
            "hostPath" => {
                let path = self.path.filter(|p| !p.is_empty()).ok_or_else(|| {
                    ConfigError::InvalidVolume {
                        name: self.name.clone(),
                        reason: "hostPath volume requires a path".to_string(),
                    }
                })?;
                VolumeSource::HostPath { path }
            }
            "pvc" => {
                let claim_name = self.claim_name.filter(|c| !c.is_empty()).ok_or_else(|| {
                    ConfigError::InvalidVolume {
                        name: self.name.clone(),
                        reason: "pvc volume requires a claim_name".to_string(),
                    }
                })?;
                VolumeSource::Pvc { claim_name }
            }
            other => {
                return Err(ConfigError::InvalidVolume {
                    name: self.name,
                    reason: format!("unknown volume type {other:?}"),
                })
            }
        };
        Ok(VolumeMount {
            name: self.name,
            mount_path: self.mount_path,
            source,
        })
    }
}

/// One configuration layer: every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipe {
    pub job_name: Option<String>,
    pub image: Option<String>,
    pub entry_script: Option<String>,
    pub script_args: Vec<String>,
    pub node_count: Option<u32>,
    pub tasks_per_node: Option<u32>,
    pub instance_type: Option<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeSpec>,
    pub queue: Option<String>,
    pub priority_class: Option<String>,
    pub label_selector: BTreeMap<String, String>,
    pub max_retry: Option<u32>,
    pub resume_from_checkpoint: Option<String>,
    pub master_port: Option<u16>,
    pub time_limit_minutes: Option<u32>,
}

/// Cluster-type and user override layers share the recipe shape.
pub type RecipeOverlay = Recipe;

impl Recipe {
    /// Load a recipe layer from a TOML file (CLI only)
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn into_job_spec(self) -> Result<JobSpec, ConfigError> {
        let builtin = BuiltinDefaults::default();

        let job_name = self.job_name.ok_or(ConfigError::MissingField("job_name"))?;
        let image = self.image.ok_or(ConfigError::MissingField("image"))?;

        let volumes = self
            .volumes
            .into_iter()
            .map(VolumeSpec::into_mount)
            .collect::<Result<Vec<_>, _>>()?;

        let spec = JobSpec {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            job_name,
            image,
            entry_script: self.entry_script.unwrap_or(builtin.entry_script),
            script_args: self.script_args,
            node_count: self.node_count.unwrap_or(builtin.node_count),
            tasks_per_node: self.tasks_per_node.unwrap_or(builtin.tasks_per_node),
            instance_type: self.instance_type.unwrap_or_default(),
            env: self.env,
            volumes,
            hints: SchedulerHints {
                queue: self.queue,
                priority_class: self.priority_class,
                label_selector: self.label_selector,
            },
            max_retry: self.max_retry.unwrap_or(builtin.max_retry),
            resume_from_checkpoint: self.resume_from_checkpoint,
            master_port: self.master_port.unwrap_or(builtin.master_port),
            time_limit_minutes: self
                .time_limit_minutes
                .unwrap_or(builtin.time_limit_minutes),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Merge the three layers and resolve into a validated JobSpec.
///
/// Precedence: user > cluster > base. Pure and deterministic; fails with
/// `ConfigError` before any stage or launcher is involved.
pub fn resolve(
    base: Recipe,
    cluster: RecipeOverlay,
    user: RecipeOverlay,
) -> Result<JobSpec, ConfigError> {
    base.merged_with(cluster).merged_with(user).into_job_spec()
}
