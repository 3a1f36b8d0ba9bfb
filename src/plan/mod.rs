//! Compiled launch plan
//!
//! A `LaunchPlan` is the backend-agnostic output of a stage: the per-node
//! entry command (with rendezvous placeholders), the shared environment,
//! and the declared resource requirements. It is immutable once produced
//! and owned exclusively by the launcher that consumes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::VolumeMount;
use crate::topology::Topology;

/// Placeholder for the node's zero-based rank, filled at materialize time
pub const NODE_RANK_PLACEHOLDER: &str = "{NODE_RANK}";

/// Placeholder for the rank-0 node's resolved address
pub const MASTER_ADDR_PLACEHOLDER: &str = "{MASTER_ADDR}";

/// Placeholder for the rendezvous port
pub const MASTER_PORT_PLACEHOLDER: &str = "{MASTER_PORT}";

/// Placeholder for the world node count
pub const NNODES_PLACEHOLDER: &str = "{NNODES}";

/// Accelerator family a plan targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    /// NVIDIA GPUs
    Gpu,
    /// AWS Trainium devices
    Trainium,
}

impl AcceleratorKind {
    /// Kubernetes extended-resource key for this family
    pub fn resource_key(&self) -> &'static str {
        match self {
            AcceleratorKind::Gpu => "nvidia.com/gpu",
            AcceleratorKind::Trainium => "aws.amazon.com/neuron",
        }
    }
}

/// Entry command for one node: container entrypoint + args
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCommand {
    /// Program to exec inside the container
    pub program: String,

    /// Arguments, possibly containing rendezvous placeholders
    pub args: Vec<String>,
}

impl NodeCommand {
    fn substituted(&self, rank: usize, topology: &Topology) -> NodeCommand {
        let fill = |s: &str| {
            s.replace(NODE_RANK_PLACEHOLDER, &rank.to_string())
                .replace(MASTER_ADDR_PLACEHOLDER, &topology.master_addr)
                .replace(MASTER_PORT_PLACEHOLDER, &topology.master_port.to_string())
                .replace(NNODES_PLACEHOLDER, &topology.world_size().to_string())
        };
        NodeCommand {
            program: fill(&self.program),
            args: self.args.iter().map(|a| fill(a)).collect(),
        }
    }
}

/// Backend concerns carried through from the JobSpec untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Accelerator devices per node
    pub accelerators_per_node: u32,

    /// Accelerator family
    pub accelerator_kind: AcceleratorKind,

    /// Network interfaces to pass through to the container
    pub network_interfaces: Vec<String>,

    /// Rendezvous port for rank 0
    pub master_port: u16,

    /// Whether nodes must be allocated exclusively
    pub exclusive: bool,

    /// Wall-clock limit per attempt in minutes
    pub time_limit_minutes: u32,

    /// Execution retry budget
    pub max_retry: u32,

    /// Checkpoint path to resume from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from_checkpoint: Option<String>,

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

/// Compiled, backend-agnostic description of what to run on each node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPlan {
    /// Job name (also the basis for backend resource names)
    pub job_name: String,

    /// Deterministic job key from the resolved spec
    pub job_key: String,

    /// Container image reference
    pub image: String,

    /// Number of nodes
    pub node_count: u32,

    /// Training processes per node
    pub tasks_per_node: u32,

    /// Entry command template shared by all nodes
    pub command: NodeCommand,

    /// Environment shared by all ranks
    pub env: BTreeMap<String, String>,

    /// Volume mounts
    pub volumes: Vec<VolumeMount>,

    /// Declared resource requirements and backend concerns
    pub requirements: Requirements,
}

impl LaunchPlan {
    /// Entry command for one rank with all placeholders filled
    pub fn command_for_rank(&self, rank: usize, topology: &Topology) -> NodeCommand {
        self.command.substituted(rank, topology)
    }

    /// Ordered per-node commands, index = rank
    pub fn commands(&self, topology: &Topology) -> Vec<NodeCommand> {
        (0..topology.world_size())
            .map(|rank| self.command_for_rank(rank, topology))
            .collect()
    }
}
