//! Built-in recipe defaults (layer 1)
//!
//! Hardcoded defaults applied after the overlay merge for every field a
//! recipe may leave unset.

use serde::{Deserialize, Serialize};

/// Default working directory inside training containers
pub const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";

/// Default rendezvous port for rank 0 (torchrun convention)
pub const DEFAULT_MASTER_PORT: u16 = 29500;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Entry script (default: "train.py")
    pub entry_script: String,

    /// Number of nodes (default: 1)
    pub node_count: u32,

    /// Training processes per node (default: 1)
    pub tasks_per_node: u32,

    /// Execution retry budget (default: 0, no retries)
    pub max_retry: u32,

    /// Rendezvous port (default: 29500)
    pub master_port: u16,

    /// Wall-clock limit per attempt in minutes (default: 720 = 12 hours)
    pub time_limit_minutes: u32,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            entry_script: "train.py".to_string(),
            node_count: 1,
            tasks_per_node: 1,
            max_retry: 0,
            master_port: DEFAULT_MASTER_PORT,
            time_limit_minutes: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.entry_script, "train.py");
        assert_eq!(defaults.node_count, 1);
        assert_eq!(defaults.tasks_per_node, 1);
        assert_eq!(defaults.max_retry, 0);
        assert_eq!(defaults.master_port, 29500);
        assert_eq!(defaults.time_limit_minutes, 720);
    }
}
