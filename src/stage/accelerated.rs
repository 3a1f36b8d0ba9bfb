//! Accelerated-recipe stage
//!
//! Same distributed launch as native training, plus accelerator-specific
//! environment (compiler cache path, device-count flags) and a gate that
//! the instance type actually belongs to the family the recipe targets.

use crate::job::JobSpec;
use crate::plan::{AcceleratorKind, LaunchPlan};
use crate::stage::{merged_env, requirements_from_spec, StageError};

use super::native::distributed_command;

/// Instance-family prefixes recognized per accelerator kind
const GPU_FAMILIES: &[&str] = &["p4d", "p4de", "p5", "p5e", "g5", "g6"];
const TRAINIUM_FAMILIES: &[&str] = &["trn1", "trn1n", "trn2"];

/// Accelerator family for an instance type, by its family prefix
/// (the part before the first '.'), or None if unrecognized.
pub(crate) fn accelerator_family(instance_type: &str) -> Option<AcceleratorKind> {
    let family = instance_type.split('.').next()?;
    if GPU_FAMILIES.contains(&family) {
        Some(AcceleratorKind::Gpu)
    } else if TRAINIUM_FAMILIES.contains(&family) {
        Some(AcceleratorKind::Trainium)
    } else {
        None
    }
}

/// Stage for curated recipes targeting one accelerator family
#[derive(Debug, Clone, Copy)]
pub struct AcceleratedRecipe {
    target: AcceleratorKind,
}

impl AcceleratedRecipe {
    pub fn new(target: AcceleratorKind) -> Self {
        Self { target }
    }

    fn injected_env(&self, spec: &JobSpec) -> Vec<(String, String)> {
        match self.target {
            AcceleratorKind::Gpu => vec![
                ("CUDA_CACHE_PATH".to_string(), "/var/cache/cuda".to_string()),
                (
                    "CUDA_VISIBLE_DEVICES".to_string(),
                    (0..spec.tasks_per_node)
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ],
            AcceleratorKind::Trainium => vec![
                (
                    "NEURON_COMPILE_CACHE_URL".to_string(),
                    "/var/cache/neuron".to_string(),
                ),
                (
                    "NEURON_RT_NUM_CORES".to_string(),
                    spec.tasks_per_node.to_string(),
                ),
            ],
        }
    }

    pub fn compile(&self, spec: &JobSpec) -> Result<LaunchPlan, StageError> {
        match accelerator_family(&spec.instance_type) {
            Some(kind) if kind == self.target => {}
            _ => {
                let family = match self.target {
                    AcceleratorKind::Gpu => "GPU",
                    AcceleratorKind::Trainium => "Trainium",
                };
                return Err(StageError::UnsupportedInstance {
                    instance_type: spec.instance_type.clone(),
                    family: family.to_string(),
                });
            }
        }

        Ok(LaunchPlan {
            job_name: spec.job_name.clone(),
            job_key: spec.job_key().unwrap_or_default(),
            image: spec.image.clone(),
            node_count: spec.node_count,
            tasks_per_node: spec.tasks_per_node,
            command: distributed_command(spec),
            env: merged_env(spec, self.injected_env(spec)),
            volumes: spec.volumes.clone(),
            requirements: requirements_from_spec(spec, self.target, vec!["efa0".to_string()]),
        })
    }
}
