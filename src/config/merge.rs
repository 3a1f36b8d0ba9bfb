//! Recipe overlay merge logic
//!
//! Implements the layered merge with:
//! - Scalars: override (last set layer wins)
//! - Maps (env, label_selector): merge by key, last layer wins per key
//! - Lists (script_args, volumes): REPLACE (last non-empty layer wins)
//!
//! The merge is associative: pre-merging cluster+user overlays and applying
//! the result to the base yields the same recipe as applying them in
//! sequence.

use super::Recipe;

impl Recipe {
    /// Merge an overlay on top of this recipe; overlay values win.
    pub fn merged_with(self, overlay: Recipe) -> Recipe {
        let mut env = self.env;
        env.extend(overlay.env);

        let mut label_selector = self.label_selector;
        label_selector.extend(overlay.label_selector);

        Recipe {
            job_name: overlay.job_name.or(self.job_name),
            image: overlay.image.or(self.image),
            entry_script: overlay.entry_script.or(self.entry_script),
            script_args: if overlay.script_args.is_empty() {
                self.script_args
            } else {
                overlay.script_args
            },
            node_count: overlay.node_count.or(self.node_count),
            tasks_per_node: overlay.tasks_per_node.or(self.tasks_per_node),
            instance_type: overlay.instance_type.or(self.instance_type),
            env,
            volumes: if overlay.volumes.is_empty() {
                self.volumes
            } else {
                overlay.volumes
            },
            queue: overlay.queue.or(self.queue),
            priority_class: overlay.priority_class.or(self.priority_class),
            label_selector,
            max_retry: overlay.max_retry.or(self.max_retry),
            resume_from_checkpoint: overlay.resume_from_checkpoint.or(self.resume_from_checkpoint),
            master_port: overlay.master_port.or(self.master_port),
            time_limit_minutes: overlay.time_limit_minutes.or(self.time_limit_minutes),
        }
    }
}
