//! Workload stages
//!
//! A stage turns a resolved `JobSpec` into a `LaunchPlan` without knowing
//! which backend will execute it. The variant set is a closed enum resolved
//! once per job from the workload shape, so adding a workload means adding
//! a variant here rather than a runtime name lookup.

mod accelerated;
mod custom;
mod native;

pub use accelerated::AcceleratedRecipe;
pub use custom::CustomScript;
pub use native::NativeTraining;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::JobSpec;
use crate::plan::{AcceleratorKind, LaunchPlan, Requirements};

/// Stage-level validation errors — fatal, never retried
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("instance type {instance_type:?} is not in the {family} accelerator family")]
    UnsupportedInstance {
        instance_type: String,
        family: String,
    },

    #[error("entry script {script:?} is not under any declared volume mount or the container workdir")]
    ScriptNotMounted { script: String },
}

/// Workload shape, selected once per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadShape {
    /// Framework-native distributed training via the torchrun-style launcher
    NativeTraining,
    /// Curated recipe targeting a specific accelerator family
    AcceleratedRecipe(AcceleratorKind),
    /// User-supplied script run verbatim
    CustomScript,
}

impl std::str::FromStr for WorkloadShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(WorkloadShape::NativeTraining),
            "gpu-recipe" => Ok(WorkloadShape::AcceleratedRecipe(AcceleratorKind::Gpu)),
            "trainium-recipe" => Ok(WorkloadShape::AcceleratedRecipe(AcceleratorKind::Trainium)),
            "custom" => Ok(WorkloadShape::CustomScript),
            other => Err(format!(
                "unknown workload shape {other:?} (expected native, gpu-recipe, trainium-recipe, custom)"
            )),
        }
    }
}

/// Stage dispatch over the closed workload-shape set
#[derive(Debug, Clone)]
pub enum Stage {
    Native(NativeTraining),
    Accelerated(AcceleratedRecipe),
    Custom(CustomScript),
}

impl Stage {
    /// Resolve the stage for a workload shape
    pub fn for_shape(shape: WorkloadShape) -> Self {
        match shape {
            WorkloadShape::NativeTraining => Stage::Native(NativeTraining),
            WorkloadShape::AcceleratedRecipe(kind) => {
                Stage::Accelerated(AcceleratedRecipe::new(kind))
            }
            WorkloadShape::CustomScript => Stage::Custom(CustomScript),
        }
    }

    /// Compile the resolved spec into a launch plan
    pub fn compile(&self, spec: &JobSpec) -> Result<LaunchPlan, StageError> {
        match self {
            Stage::Native(stage) => stage.compile(spec),
            Stage::Accelerated(stage) => stage.compile(spec),
            Stage::Custom(stage) => stage.compile(spec),
        }
    }
}

/// Backend concerns propagated from the JobSpec unchanged; every variant
/// goes through here so `max_retry`, `resume_from_checkpoint`, and
/// `label_selector` never diverge per workload.
pub(crate) fn requirements_from_spec(
    spec: &JobSpec,
    accelerator_kind: AcceleratorKind,
    network_interfaces: Vec<String>,
) -> Requirements {
    Requirements {
        accelerators_per_node: spec.tasks_per_node,
        accelerator_kind,
        network_interfaces,
        master_port: spec.master_port,
        exclusive: true,
        time_limit_minutes: spec.time_limit_minutes,
        max_retry: spec.max_retry,
        resume_from_checkpoint: spec.resume_from_checkpoint.clone(),
        queue: spec.hints.queue.clone(),
        priority_class: spec.hints.priority_class.clone(),
        label_selector: spec.hints.label_selector.clone(),
    }
}

/// Shared env assembly: stage-injected defaults never override user env.
pub(crate) fn merged_env(
    spec: &JobSpec,
    injected: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut env = spec.env.clone();
    for (key, value) in injected {
        env.entry(key).or_insert(value);
    }
    env
}
