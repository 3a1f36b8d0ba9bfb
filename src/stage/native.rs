//! Native distributed-training stage
//!
//! Wraps the framework's distributed launcher (torchrun) around the entry
//! script. Rendezvous arguments carry placeholders that the launcher fills
//! at materialize time from the computed topology.

use crate::job::JobSpec;
use crate::plan::{
    AcceleratorKind, LaunchPlan, NodeCommand, MASTER_ADDR_PLACEHOLDER, MASTER_PORT_PLACEHOLDER,
    NNODES_PLACEHOLDER, NODE_RANK_PLACEHOLDER,
};
use crate::stage::{merged_env, requirements_from_spec, StageError};

use super::accelerated::accelerator_family;

/// Stage for framework-native distributed training
#[derive(Debug, Clone, Copy)]
pub struct NativeTraining;

/// Build the torchrun invocation shared by the native and accelerated
/// stages. The checkpoint path, when present, is appended as a script
/// argument so each retry can re-derive the command from the latest path.
pub(crate) fn distributed_command(spec: &JobSpec) -> NodeCommand {
    let mut args = vec![
        "--nnodes".to_string(),
        NNODES_PLACEHOLDER.to_string(),
        "--nproc-per-node".to_string(),
        spec.tasks_per_node.to_string(),
        "--node-rank".to_string(),
        NODE_RANK_PLACEHOLDER.to_string(),
        "--master-addr".to_string(),
        MASTER_ADDR_PLACEHOLDER.to_string(),
        "--master-port".to_string(),
        MASTER_PORT_PLACEHOLDER.to_string(),
        spec.entry_script.clone(),
    ];
    args.extend(spec.script_args.iter().cloned());
    if let Some(checkpoint) = &spec.resume_from_checkpoint {
        args.push("--resume-from-checkpoint".to_string());
        args.push(checkpoint.clone());
    }
    NodeCommand {
        program: "torchrun".to_string(),
        args,
    }
}

impl NativeTraining {
    pub fn compile(&self, spec: &JobSpec) -> Result<LaunchPlan, StageError> {
        // Native training does not gate on the instance family; an
        // unrecognized type is scheduled as a GPU workload.
        let kind = accelerator_family(&spec.instance_type).unwrap_or(AcceleratorKind::Gpu);

        Ok(LaunchPlan {
            job_name: spec.job_name.clone(),
            job_key: spec.job_key().unwrap_or_default(),
            image: spec.image.clone(),
            node_count: spec.node_count,
            tasks_per_node: spec.tasks_per_node,
            command: distributed_command(spec),
            env: merged_env(spec, []),
            volumes: spec.volumes.clone(),
            requirements: requirements_from_spec(spec, kind, vec![]),
        })
    }
}
