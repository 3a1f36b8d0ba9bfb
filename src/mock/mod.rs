//! Scriptable mock launcher
//!
//! Drives the orchestrator in tests without a scheduler or cluster.
//! Submissions and polls are consumed from scripted queues, so a test
//! states the exact failure sequence it wants: a transient submission
//! error followed by acceptance, an unreachable poll window, a node
//! failure mid-run.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::backend::BackendError;
use crate::plan::LaunchPlan;
use crate::submission::BackendKind;
use crate::topology::Topology;

use crate::launcher::{Artifact, ArtifactError, Launcher, PollStatus, SubmissionError};

/// Scripted outcome of one submit call
#[derive(Debug, Clone)]
pub enum ScriptedSubmit {
    /// Accept and assign this backend job id
    Accept(String),
    /// Fail transiently (scheduler unreachable)
    Transient(String),
    /// Fail fatally (registry rejected credentials)
    AuthRejected(String),
}

/// Scripted outcome of one poll call
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Status(PollStatus),
    /// Backend unreachable at poll time
    Unreachable(String),
}

/// Launcher whose behavior is fully scripted ahead of time
pub struct MockLauncher {
    kind: BackendKind,
    nodes: Vec<String>,
    delegated_execution_retries: bool,
    submits: Mutex<VecDeque<ScriptedSubmit>>,
    polls: Mutex<VecDeque<ScriptedPoll>>,
    last_poll: Mutex<Option<PollStatus>>,
    cancelled: Mutex<Vec<String>>,
    submitted: Mutex<Vec<String>>,
}

impl MockLauncher {
    pub fn new(kind: BackendKind, nodes: Vec<String>) -> Self {
        Self {
            kind,
            nodes,
            delegated_execution_retries: false,
            submits: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            last_poll: Mutex::new(None),
            cancelled: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Behave like a backend whose controller restarts failures itself
    pub fn with_delegated_execution_retries(mut self) -> Self {
        self.delegated_execution_retries = true;
        self
    }

    pub fn script_submit(&self, outcome: ScriptedSubmit) {
        self.submits.lock().unwrap().push_back(outcome);
    }

    pub fn script_poll(&self, outcome: ScriptedPoll) {
        self.polls.lock().unwrap().push_back(outcome);
    }

    /// Backend job ids accepted so far, in order
    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    /// Backend job ids cancelled so far, in order
    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl Launcher for MockLauncher {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn discover_nodes(&self, _plan: &LaunchPlan) -> Result<Vec<String>, SubmissionError> {
        Ok(self.nodes.clone())
    }

    fn materialize(
        &self,
        plan: &LaunchPlan,
        _topology: &Topology,
        artifact_dir: &Path,
    ) -> Result<Vec<Artifact>, ArtifactError> {
        let path = artifact_dir.join("plan.json");
        let json = serde_json::to_string_pretty(plan)?;
        fs::write(&path, json).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(vec![Artifact::Manifest(path)])
    }

    fn submit(
        &self,
        _plan: &LaunchPlan,
        _artifacts: &[Artifact],
    ) -> Result<String, SubmissionError> {
        let outcome = self
            .submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedSubmit::Accept("mock-job".to_string()));

        match outcome {
            ScriptedSubmit::Accept(id) => {
                self.submitted.lock().unwrap().push(id.clone());
                Ok(id)
            }
            ScriptedSubmit::Transient(stderr) => {
                Err(SubmissionError::Backend(BackendError::Unavailable {
                    program: "mock".to_string(),
                    stderr,
                }))
            }
            ScriptedSubmit::AuthRejected(stderr) => {
                Err(SubmissionError::Backend(BackendError::RegistryAuth {
                    stderr,
                }))
            }
        }
    }

    fn poll(&self, _backend_job_id: &str) -> Result<PollStatus, SubmissionError> {
        let outcome = self.polls.lock().unwrap().pop_front();
        match outcome {
            Some(ScriptedPoll::Status(status)) => {
                *self.last_poll.lock().unwrap() = Some(status.clone());
                Ok(status)
            }
            Some(ScriptedPoll::Unreachable(stderr)) => {
                Err(SubmissionError::Backend(BackendError::Unavailable {
                    program: "mock".to_string(),
                    stderr,
                }))
            }
            // Script exhausted: repeat the last observed status.
            None => Ok(self
                .last_poll
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(PollStatus::Pending)),
        }
    }

    fn cancel(&self, backend_job_id: &str) -> Result<(), SubmissionError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(backend_job_id.to_string());
        Ok(())
    }

    fn delegates_execution_retries(&self) -> bool {
        self.delegated_execution_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> LaunchPlan {
        use crate::plan::{AcceleratorKind, NodeCommand, Requirements};
        use std::collections::BTreeMap;

        LaunchPlan {
            job_name: "probe".to_string(),
            job_key: "k".to_string(),
            image: "img".to_string(),
            node_count: 1,
            tasks_per_node: 1,
            command: NodeCommand {
                program: "true".to_string(),
                args: vec![],
            },
            env: BTreeMap::new(),
            volumes: vec![],
            requirements: Requirements {
                accelerators_per_node: 1,
                accelerator_kind: AcceleratorKind::Gpu,
                network_interfaces: vec![],
                master_port: 29500,
                exclusive: true,
                time_limit_minutes: 10,
                max_retry: 0,
                resume_from_checkpoint: None,
                queue: None,
                priority_class: None,
                label_selector: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_scripted_submit_sequence() {
        let launcher = MockLauncher::new(BackendKind::Slurm, vec!["n0".to_string()]);
        launcher.script_submit(ScriptedSubmit::Transient("down".to_string()));
        launcher.script_submit(ScriptedSubmit::Accept("42".to_string()));

        assert!(launcher.submit(&plan(), &[]).is_err());
        assert_eq!(launcher.submit(&plan(), &[]).unwrap(), "42");
        assert_eq!(launcher.submitted_ids(), vec!["42"]);
    }

    #[test]
    fn test_poll_repeats_last_status_when_script_runs_out() {
        let launcher = MockLauncher::new(BackendKind::Slurm, vec!["n0".to_string()]);
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Running));

        assert_eq!(launcher.poll("42").unwrap(), PollStatus::Running);
        assert_eq!(launcher.poll("42").unwrap(), PollStatus::Running);
    }

    #[test]
    fn test_unreachable_poll_is_transient() {
        let launcher = MockLauncher::new(BackendKind::Kubernetes, vec!["n0".to_string()]);
        launcher.script_poll(ScriptedPoll::Unreachable("apiserver down".to_string()));

        let err = launcher.poll("42").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_materialize_writes_plan_artifact() {
        let launcher = MockLauncher::new(BackendKind::Slurm, vec!["n0".to_string()]);
        let dir = tempfile::tempdir().unwrap();
        let topology = Topology {
            nodes: vec!["n0".to_string()],
            master_addr: "n0".to_string(),
            master_port: 29500,
        };

        let artifacts = launcher.materialize(&plan(), &topology, dir.path()).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].path().exists());
    }
}
