//! Distributed rendezvous topology
//!
//! The coordinator turns a discovered node set into the rank assignment
//! shared by every bootstrap script of one submission. Ranks are assigned
//! by sorting node identifiers lexicographically, never by arrival order,
//! so retries with the same node set reproduce the same assignment. The
//! topology is recomputed from scratch on every (re)submission: ranks are
//! not preserved across node replacement.

use serde::{Deserialize, Serialize};

use crate::plan::LaunchPlan;

/// Topology errors
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("no nodes discovered")]
    NoNodes,

    #[error("discovered {actual} nodes, plan requires {expected}")]
    NodeCountMismatch { expected: u32, actual: usize },

    #[error("failed to resolve address for node {node}: {reason}")]
    Resolve { node: String, reason: String },
}

/// Resolves a node identifier into a network address
///
/// The master address is re-resolved on every retry because node
/// identities may change after replacement.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, node: &str) -> Result<String, TopologyError>;
}

/// Uses the node identifier itself as its address (hostnames resolvable
/// via DNS, or Kubernetes pod names on a headless service)
pub struct IdentityResolver;

impl AddressResolver for IdentityResolver {
    fn resolve(&self, node: &str) -> Result<String, TopologyError> {
        Ok(node.to_string())
    }
}

/// Rendezvous topology shared read-only by all per-node bootstrap scripts
/// of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Node identifiers in lexicographic order; rank = index
    pub nodes: Vec<String>,

    /// Resolved network address of the rank-0 node
    pub master_addr: String,

    /// Rendezvous port
    pub master_port: u16,
}

impl Topology {
    /// Number of nodes in the assignment
    pub fn world_size(&self) -> usize {
        self.nodes.len()
    }

    /// The rank-0 node identifier
    pub fn master(&self) -> &str {
        &self.nodes[0]
    }

    /// Rank of a node, if it is part of this topology
    pub fn rank_of(&self, node: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }
}

/// Computes the rendezvous topology for a launch plan
pub struct NodeCoordinator {
    resolver: Box<dyn AddressResolver>,
}

impl NodeCoordinator {
    /// Coordinator with the identity resolver
    pub fn new() -> Self {
        Self {
            resolver: Box::new(IdentityResolver),
        }
    }

    /// Coordinator with a custom address resolver
    pub fn with_resolver(resolver: Box<dyn AddressResolver>) -> Self {
        Self { resolver }
    }

    /// Compute the topology for a discovered node set.
    ///
    /// Deterministic: the same set produces the same assignment regardless
    /// of discovery order. Duplicate identifiers collapse to one entry.
    pub fn topology(
        &self,
        plan: &LaunchPlan,
        discovered_nodes: &[String],
    ) -> Result<Topology, TopologyError> {
        if discovered_nodes.is_empty() {
            return Err(TopologyError::NoNodes);
        }

        let mut nodes: Vec<String> = discovered_nodes.to_vec();
        nodes.sort();
        nodes.dedup();

        if nodes.len() != plan.node_count as usize {
            return Err(TopologyError::NodeCountMismatch {
                expected: plan.node_count,
                actual: nodes.len(),
            });
        }

        let master_addr = self.resolver.resolve(&nodes[0])?;

        Ok(Topology {
            nodes,
            master_addr,
            master_port: plan.requirements.master_port,
        })
    }
}

impl Default for NodeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
