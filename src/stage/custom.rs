//! Custom-script stage
//!
//! Runs the user-supplied script and arguments verbatim. The only
//! validation is that the script path is actually reachable inside the
//! container: under one of the declared volume mounts, or relative to the
//! container's default working directory. The checkpoint path, when set,
//! is exposed through the environment so the argv stays untouched.

use std::path::Path;

use crate::config::DEFAULT_CONTAINER_WORKDIR;
use crate::job::JobSpec;
use crate::plan::{AcceleratorKind, LaunchPlan, NodeCommand};
use crate::stage::{merged_env, requirements_from_spec, StageError};

use super::accelerated::accelerator_family;

/// Environment variable carrying the resume checkpoint path for custom
/// scripts
pub const CHECKPOINT_ENV: &str = "TRAINLANE_CHECKPOINT_PATH";

/// Stage for user-supplied scripts
#[derive(Debug, Clone, Copy)]
pub struct CustomScript;

fn script_is_mounted(spec: &JobSpec) -> bool {
    let script = Path::new(&spec.entry_script);
    if script.is_relative() {
        // Relative paths resolve under the container workdir.
        return true;
    }
    if script.starts_with(DEFAULT_CONTAINER_WORKDIR) {
        return true;
    }
    spec.volumes
        .iter()
        .any(|volume| script.starts_with(&volume.mount_path))
}

impl CustomScript {
    pub fn compile(&self, spec: &JobSpec) -> Result<LaunchPlan, StageError> {
        if !script_is_mounted(spec) {
            return Err(StageError::ScriptNotMounted {
                script: spec.entry_script.clone(),
            });
        }

        let kind = accelerator_family(&spec.instance_type).unwrap_or(AcceleratorKind::Gpu);

        let injected = spec
            .resume_from_checkpoint
            .iter()
            .map(|ckpt| (CHECKPOINT_ENV.to_string(), ckpt.clone()))
            .collect::<Vec<_>>();

        Ok(LaunchPlan {
            job_name: spec.job_name.clone(),
            job_key: spec.job_key().unwrap_or_default(),
            image: spec.image.clone(),
            node_count: spec.node_count,
            tasks_per_node: spec.tasks_per_node,
            command: NodeCommand {
                program: spec.entry_script.clone(),
                args: spec.script_args.clone(),
            },
            env: merged_env(spec, injected),
            volumes: spec.volumes.clone(),
            requirements: requirements_from_spec(spec, kind, vec![]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, SchedulerHints, VolumeMount, VolumeSource};
    use std::collections::BTreeMap;

    fn spec(entry_script: &str) -> JobSpec {
        JobSpec {
            schema_version: crate::job::SCHEMA_VERSION,
            schema_id: crate::job::SCHEMA_ID.to_string(),
            job_name: "probe".to_string(),
            image: "repo/img:tag".to_string(),
            entry_script: entry_script.to_string(),
            script_args: vec!["--debug".to_string()],
            node_count: 1,
            tasks_per_node: 1,
            instance_type: "p5.48xlarge".to_string(),
            env: BTreeMap::new(),
            volumes: vec![VolumeMount {
                name: "code".to_string(),
                mount_path: "/mnt/code".to_string(),
                source: VolumeSource::HostPath {
                    path: "/opt/code".to_string(),
                },
            }],
            hints: SchedulerHints::default(),
            max_retry: 0,
            resume_from_checkpoint: None,
            master_port: 29500,
            time_limit_minutes: 60,
        }
    }

    #[test]
    fn test_verbatim_command() {
        let plan = CustomScript.compile(&spec("run.sh")).unwrap();
        assert_eq!(plan.command.program, "run.sh");
        assert_eq!(plan.command.args, vec!["--debug"]);
    }

    #[test]
    fn test_script_under_volume_mount_accepted() {
        let plan = CustomScript.compile(&spec("/mnt/code/run.sh")).unwrap();
        assert_eq!(plan.command.program, "/mnt/code/run.sh");
    }

    #[test]
    fn test_script_under_workdir_accepted() {
        assert!(CustomScript.compile(&spec("/workspace/run.sh")).is_ok());
    }

    #[test]
    fn test_unmounted_script_rejected() {
        let err = CustomScript.compile(&spec("/usr/local/bin/run.sh")).unwrap_err();
        assert!(matches!(err, StageError::ScriptNotMounted { .. }));
    }

    #[test]
    fn test_checkpoint_exposed_via_env() {
        let mut spec = spec("run.sh");
        spec.resume_from_checkpoint = Some("/ckpt/step-500".to_string());

        let plan = CustomScript.compile(&spec).unwrap();
        assert_eq!(
            plan.env.get(CHECKPOINT_ENV).map(String::as_str),
            Some("/ckpt/step-500")
        );
        // Argv stays verbatim.
        assert_eq!(plan.command.args, vec!["--debug"]);
    }

    #[test]
    fn test_retry_budget_propagated() {
        let mut spec = spec("run.sh");
        spec.max_retry = 3;
        let plan = CustomScript.compile(&spec).unwrap();
        assert_eq!(plan.requirements.max_retry, 3);
    }
}
