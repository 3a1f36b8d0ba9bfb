//! Launch orchestration
//!
//! Drives one job through its whole lifecycle: compile the plan, compute
//! the topology, materialize artifacts, submit, poll to a terminal state,
//! and apply the retry policy on failure. Every observable transition is
//! persisted to the submission record before the orchestrator acts on it,
//! so a crashed orchestrator can be resumed against the same record
//! without resubmitting.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LaunchError;
use crate::job::JobSpec;
use crate::launcher::{Launcher, PollStatus, SubmissionError};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stage::{Stage, WorkloadShape};
use crate::submission::{StateError, SubmissionRecord, SubmissionState};
use crate::topology::NodeCoordinator;

/// Supplies the most recent checkpoint for a retry attempt. The command
/// is re-derived from this on every attempt, so a retry resumes from the
/// newest checkpoint rather than the one the job was first submitted
/// with.
pub trait CheckpointLocator: Send + Sync {
    fn latest(&self, spec: &JobSpec) -> Option<String>;
}

/// Uses whatever the spec declared, unchanged across attempts
pub struct SpecCheckpoint;

impl CheckpointLocator for SpecCheckpoint {
    fn latest(&self, spec: &JobSpec) -> Option<String> {
        spec.resume_from_checkpoint.clone()
    }
}

/// Outcome of the poll loop for one attempt
#[derive(Debug)]
enum AttemptOutcome {
    Succeeded,
    Cancelled,
    /// Backend unreachable past the staleness threshold; record left in
    /// UNKNOWN for the operator, never auto-retried
    Stale,
    Failed(String),
}

/// Orchestrates launches against one backend
pub struct Orchestrator {
    launcher: Box<dyn Launcher>,
    coordinator: NodeCoordinator,
    policy: RetryPolicy,
    checkpoints: Box<dyn CheckpointLocator>,
    state_dir: PathBuf,
    artifact_root: PathBuf,
    poll_interval: Duration,
    /// Consecutive transient poll failures tolerated before the record is
    /// marked UNKNOWN
    max_stale_polls: u32,
}

impl Orchestrator {
    pub fn new(launcher: Box<dyn Launcher>, state_dir: PathBuf, artifact_root: PathBuf) -> Self {
        Self {
            launcher,
            coordinator: NodeCoordinator::new(),
            policy: RetryPolicy::default(),
            checkpoints: Box::new(SpecCheckpoint),
            state_dir,
            artifact_root,
            poll_interval: Duration::from_secs(15),
            max_stale_polls: 8,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_coordinator(mut self, coordinator: NodeCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_checkpoint_locator(mut self, locator: Box<dyn CheckpointLocator>) -> Self {
        self.checkpoints = locator;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_stale_polls(mut self, max: u32) -> Self {
        self.max_stale_polls = max;
        self
    }

    /// Launch a job and drive it to a terminal state (or UNKNOWN).
    ///
    /// Returns the final record on SUCCEEDED, CANCELLED, or UNKNOWN;
    /// failures come back as errors with the record already persisted.
    pub fn launch(
        &self,
        spec: &JobSpec,
        shape: WorkloadShape,
    ) -> Result<SubmissionRecord, LaunchError> {
        let mut record = SubmissionRecord::new(
            spec.job_name.clone(),
            spec.job_key()?,
            self.launcher.kind(),
            spec.max_retry,
        );
        record.write_to_state_dir(&self.state_dir)?;

        tracing::info!(
            job = %spec.job_name,
            backend = %self.launcher.kind(),
            "launching job"
        );
        self.run_attempts(spec, shape, &mut record, true)?;
        Ok(record)
    }

    /// Re-attach to an existing submission and continue driving it,
    /// without resubmitting a live job.
    pub fn resume(
        &self,
        spec: &JobSpec,
        shape: WorkloadShape,
    ) -> Result<SubmissionRecord, LaunchError> {
        let mut record = self.load_record(&spec.job_name)?;
        if record.is_terminal() {
            return Ok(record);
        }

        // Resubmit if the previous run died before the backend accepted
        // anything, or mid-retry: a RETRYING record has already charged
        // the budget and its stored backend id belongs to the failed
        // attempt.
        let needs_submit =
            record.backend_job_id.is_none() || record.state == SubmissionState::Retrying;
        tracing::info!(job = %spec.job_name, needs_submit, "resuming job");
        self.run_attempts(spec, shape, &mut record, needs_submit)?;
        Ok(record)
    }

    /// Poll once and fold the result into the persisted record
    pub fn status(&self, job_name: &str) -> Result<SubmissionRecord, LaunchError> {
        let mut record = self.load_record(job_name)?;
        if record.is_terminal() {
            return Ok(record);
        }
        let Some(job_id) = record.backend_job_id.clone() else {
            return Ok(record);
        };
        if record.state == SubmissionState::Retrying {
            // The stored backend id belongs to the failed attempt;
            // nothing is live to poll until resubmission.
            return Ok(record);
        }

        match self.launcher.poll(&job_id) {
            Ok(PollStatus::Pending) => {
                if record.state == SubmissionState::Unknown {
                    record.transition(SubmissionState::Pending)?;
                }
            }
            Ok(PollStatus::Running) => {
                if record.state != SubmissionState::Running {
                    record.transition(SubmissionState::Running)?;
                }
            }
            Ok(PollStatus::Succeeded) => record.transition(SubmissionState::Succeeded)?,
            Ok(PollStatus::Cancelled) => record.transition(SubmissionState::Cancelled)?,
            Ok(PollStatus::Failed { reason }) => record.fail(reason)?,
            Err(err) if err.is_transient() => {
                tracing::warn!(job = %job_name, error = %err, "backend unreachable, view is stale");
                if record.state != SubmissionState::Unknown {
                    record.transition(SubmissionState::Unknown)?;
                }
            }
            Err(err) => return Err(err.into()),
        }

        record.write_to_state_dir(&self.state_dir)?;
        Ok(record)
    }

    /// Cancel a job. Idempotent: cancelling a terminal record is a no-op.
    pub fn cancel(&self, job_name: &str) -> Result<SubmissionRecord, LaunchError> {
        let mut record = self.load_record(job_name)?;
        if record.is_terminal() {
            return Ok(record);
        }

        if let Some(job_id) = &record.backend_job_id {
            self.launcher.cancel(job_id)?;
        }
        record.transition(SubmissionState::Cancelled)?;
        record.write_to_state_dir(&self.state_dir)?;
        tracing::info!(job = %job_name, "cancelled job");
        Ok(record)
    }

    fn load_record(&self, job_name: &str) -> Result<SubmissionRecord, LaunchError> {
        let path = SubmissionRecord::record_path(&self.state_dir, job_name);
        if !path.exists() {
            return Err(LaunchError::RecordNotFound(job_name.to_string()));
        }
        Ok(SubmissionRecord::from_file(&path)?)
    }

    /// The attempt loop: (re)submit as needed, poll to an outcome, and
    /// consult the retry policy on failure.
    fn run_attempts(
        &self,
        spec: &JobSpec,
        shape: WorkloadShape,
        record: &mut SubmissionRecord,
        mut needs_submit: bool,
    ) -> Result<(), LaunchError> {
        let stage = Stage::for_shape(shape);

        loop {
            if needs_submit {
                // Re-derive the plan per attempt so a retry resumes from
                // the newest checkpoint.
                let mut attempt_spec = spec.clone();
                attempt_spec.resume_from_checkpoint = self
                    .checkpoints
                    .latest(spec)
                    .or_else(|| spec.resume_from_checkpoint.clone());
                let plan = stage.compile(&attempt_spec)?;

                let nodes = match self.launcher.discover_nodes(&plan) {
                    Ok(nodes) => nodes,
                    Err(err) => {
                        let delay = self.on_submission_error(record, err)?;
                        std::thread::sleep(delay);
                        continue;
                    }
                };
                let topology = self.coordinator.topology(&plan, &nodes)?;

                let artifact_dir = self
                    .artifact_root
                    .join(&record.job_name)
                    .join(format!("attempt-{}", record.retry_count));
                fs::create_dir_all(&artifact_dir).map_err(|source| {
                    LaunchError::Artifact(crate::launcher::ArtifactError::Io {
                        path: artifact_dir.clone(),
                        source,
                    })
                })?;
                let artifacts = self.launcher.materialize(&plan, &topology, &artifact_dir)?;

                match self.launcher.submit(&plan, &artifacts) {
                    Ok(job_id) => {
                        tracing::info!(
                            job = %record.job_name,
                            backend_job_id = %job_id,
                            attempt = record.retry_count,
                            "submission accepted"
                        );
                        record.accept(job_id)?;
                        record.write_to_state_dir(&self.state_dir)?;
                    }
                    Err(err) => {
                        let delay = self.on_submission_error(record, err)?;
                        std::thread::sleep(delay);
                        continue;
                    }
                }
            }
            needs_submit = true;

            match self.wait(record)? {
                AttemptOutcome::Succeeded => {
                    tracing::info!(job = %record.job_name, "job succeeded");
                    return Ok(());
                }
                AttemptOutcome::Cancelled => return Ok(()),
                AttemptOutcome::Stale => return Ok(()),
                AttemptOutcome::Failed(reason) => {
                    if self.launcher.delegates_execution_retries() {
                        // The backend controller already spent the retry
                        // budget restarting in place; resubmitting here
                        // would double it.
                        if record.max_retry == 0 {
                            record.fail(reason.clone())?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Err(LaunchError::ExecutionFailed(reason));
                        }
                        record.exhaust(reason.clone())?;
                        record.write_to_state_dir(&self.state_dir)?;
                        return Err(LaunchError::RetriesExhausted {
                            attempts: record.max_retry,
                            last_failure: reason,
                        });
                    }
                    match self
                        .policy
                        .on_execution_failure(record.retry_count, record.max_retry)
                    {
                        RetryDecision::Retry { delay } => {
                            tracing::warn!(
                                job = %record.job_name,
                                reason = %reason,
                                attempt = record.retry_count + 1,
                                "execution failed, retrying"
                            );
                            record.begin_retry(reason)?;
                            record.write_to_state_dir(&self.state_dir)?;
                            std::thread::sleep(delay);
                        }
                        RetryDecision::Exhausted if record.max_retry == 0 => {
                            record.fail(reason.clone())?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Err(LaunchError::ExecutionFailed(reason));
                        }
                        RetryDecision::Exhausted => {
                            record.exhaust(reason.clone())?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Err(LaunchError::RetriesExhausted {
                                attempts: record.retry_count,
                                last_failure: reason,
                            });
                        }
                        RetryDecision::Fatal => {
                            record.fail(reason.clone())?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Err(LaunchError::ExecutionFailed(reason));
                        }
                    }
                }
            }
        }
    }

    /// Apply the policy to a submission-phase error; returns the backoff
    /// delay when the attempt should be repeated.
    fn on_submission_error(
        &self,
        record: &mut SubmissionRecord,
        err: SubmissionError,
    ) -> Result<Duration, LaunchError> {
        match self
            .policy
            .on_submission_error(&err, record.retry_count, record.max_retry)
        {
            RetryDecision::Retry { delay } => {
                tracing::warn!(
                    job = %record.job_name,
                    error = %err,
                    attempt = record.retry_count + 1,
                    "submission failed, retrying"
                );
                record.begin_retry(err.to_string())?;
                record.write_to_state_dir(&self.state_dir)?;
                Ok(delay)
            }
            RetryDecision::Fatal => {
                record.fail(err.to_string())?;
                record.write_to_state_dir(&self.state_dir)?;
                Err(err.into())
            }
            RetryDecision::Exhausted => {
                let reason = err.to_string();
                record.exhaust(reason.clone())?;
                record.write_to_state_dir(&self.state_dir)?;
                Err(LaunchError::RetriesExhausted {
                    attempts: record.retry_count,
                    last_failure: reason,
                })
            }
        }
    }

    /// Poll one attempt to an outcome, persisting every state change
    fn wait(&self, record: &mut SubmissionRecord) -> Result<AttemptOutcome, LaunchError> {
        let job_id = record
            .backend_job_id
            .clone()
            .ok_or_else(|| StateError::MissingBackendJobId {
                job_name: record.job_name.clone(),
            })?;
        let mut stale_polls = 0u32;

        loop {
            match self.launcher.poll(&job_id) {
                Ok(status) => {
                    stale_polls = 0;
                    if record.state == SubmissionState::Unknown {
                        // A successful poll restores the live view.
                        let restored = match &status {
                            PollStatus::Pending => SubmissionState::Pending,
                            PollStatus::Running => SubmissionState::Running,
                            PollStatus::Succeeded => SubmissionState::Running,
                            PollStatus::Failed { .. } => SubmissionState::Running,
                            PollStatus::Cancelled => SubmissionState::Running,
                        };
                        record.transition(restored)?;
                        record.write_to_state_dir(&self.state_dir)?;
                    }
                    match status {
                        PollStatus::Pending => {}
                        PollStatus::Running => {
                            if record.state != SubmissionState::Running {
                                record.transition(SubmissionState::Running)?;
                                record.write_to_state_dir(&self.state_dir)?;
                            }
                        }
                        PollStatus::Succeeded => {
                            record.transition(SubmissionState::Succeeded)?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Ok(AttemptOutcome::Succeeded);
                        }
                        PollStatus::Cancelled => {
                            record.transition(SubmissionState::Cancelled)?;
                            record.write_to_state_dir(&self.state_dir)?;
                            return Ok(AttemptOutcome::Cancelled);
                        }
                        PollStatus::Failed { reason } => {
                            return Ok(AttemptOutcome::Failed(reason));
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    stale_polls += 1;
                    if stale_polls >= self.max_stale_polls {
                        tracing::warn!(
                            job = %record.job_name,
                            polls = stale_polls,
                            "backend unreachable, marking record unknown"
                        );
                        record.transition(SubmissionState::Unknown)?;
                        record.write_to_state_dir(&self.state_dir)?;
                        return Ok(AttemptOutcome::Stale);
                    }
                }
                Err(err) => return Err(err.into()),
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, SchedulerHints};
    use crate::mock::{MockLauncher, ScriptedPoll, ScriptedSubmit};
    use crate::submission::BackendKind;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn spec(max_retry: u32) -> JobSpec {
        JobSpec {
            schema_version: crate::job::SCHEMA_VERSION,
            schema_id: crate::job::SCHEMA_ID.to_string(),
            job_name: "llama-ft".to_string(),
            image: "repo/img:tag".to_string(),
            entry_script: "train.py".to_string(),
            script_args: vec![],
            node_count: 2,
            tasks_per_node: 8,
            instance_type: "p5.48xlarge".to_string(),
            env: BTreeMap::new(),
            volumes: vec![],
            hints: SchedulerHints::default(),
            max_retry,
            resume_from_checkpoint: None,
            master_port: 29500,
            time_limit_minutes: 720,
        }
    }

    fn orchestrator(launcher: Box<dyn Launcher>, dir: &std::path::Path) -> Orchestrator {
        Orchestrator::new(
            launcher,
            dir.join("state"),
            dir.join("artifacts"),
        )
        .with_policy(RetryPolicy::new(Duration::ZERO, Duration::ZERO))
        .with_poll_interval(Duration::ZERO)
        .with_max_stale_polls(2)
    }

    fn mock(nodes: &[&str]) -> MockLauncher {
        MockLauncher::new(
            BackendKind::Slurm,
            nodes.iter().map(|n| n.to_string()).collect(),
        )
    }

    #[test]
    fn test_happy_path_to_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("100".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Pending));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Running));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator
            .launch(&spec(0), WorkloadShape::NativeTraining)
            .unwrap();

        assert_eq!(record.state, SubmissionState::Succeeded);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.backend_job_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_transient_submission_failure_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Transient("scheduler busy".to_string()));
        launcher.script_submit(ScriptedSubmit::Accept("101".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator
            .launch(&spec(1), WorkloadShape::NativeTraining)
            .unwrap();

        assert_eq!(record.state, SubmissionState::Succeeded);
        assert_eq!(record.retry_count, 1);
        assert!(record
            .last_failure
            .as_deref()
            .unwrap()
            .contains("scheduler busy"));
    }

    #[test]
    fn test_registry_auth_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::AuthRejected("denied".to_string()));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let err = orchestrator
            .launch(&spec(5), WorkloadShape::NativeTraining)
            .unwrap_err();

        assert!(matches!(err, LaunchError::Submission(_)));
        let record = orchestrator.status("llama-ft").unwrap();
        assert_eq!(record.state, SubmissionState::Failed);
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_execution_failure_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("102".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Running));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "NODE_FAIL".to_string(),
        }));
        launcher.script_submit(ScriptedSubmit::Accept("103".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator
            .launch(&spec(1), WorkloadShape::NativeTraining)
            .unwrap();

        assert_eq!(record.state, SubmissionState::Succeeded);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.backend_job_id.as_deref(), Some("103"));
    }

    #[test]
    fn test_execution_failure_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("104".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "oom".to_string(),
        }));
        launcher.script_submit(ScriptedSubmit::Accept("105".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "oom again".to_string(),
        }));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let err = orchestrator
            .launch(&spec(1), WorkloadShape::NativeTraining)
            .unwrap_err();

        assert!(matches!(err, LaunchError::RetriesExhausted { .. }));
        let record = orchestrator.status("llama-ft").unwrap();
        assert_eq!(record.state, SubmissionState::ExhaustedRetries);
        assert_eq!(record.retry_count, 1);
    }

    #[test]
    fn test_delegated_retries_do_not_resubmit() {
        let dir = tempfile::tempdir().unwrap();
        // A backend whose controller restarts failures itself reports
        // FAILED only once its own budget is spent.
        let launcher = MockLauncher::new(
            BackendKind::Kubernetes,
            vec!["w0".to_string(), "w1".to_string()],
        )
        .with_delegated_execution_retries();
        launcher.script_submit(ScriptedSubmit::Accept("pyjob-1".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "backoff limit exceeded".to_string(),
        }));
        let submitted = Arc::new(launcher);

        let orchestrator = orchestrator(Box::new(ArcLauncher(submitted.clone())), dir.path());
        let err = orchestrator
            .launch(&spec(1), WorkloadShape::NativeTraining)
            .unwrap_err();

        assert!(matches!(err, LaunchError::RetriesExhausted { .. }));
        // Exactly one submission: no in-process resubmit on top of the
        // backend's own restarts.
        assert_eq!(submitted.submitted_ids(), vec!["pyjob-1"]);
        let record = orchestrator.status("llama-ft").unwrap();
        assert_eq!(record.state, SubmissionState::ExhaustedRetries);
    }

    /// Lets a test keep a handle on a launcher the orchestrator owns
    struct ArcLauncher(Arc<MockLauncher>);

    impl Launcher for ArcLauncher {
        fn kind(&self) -> BackendKind {
            self.0.kind()
        }
        fn discover_nodes(
            &self,
            plan: &crate::plan::LaunchPlan,
        ) -> Result<Vec<String>, crate::launcher::SubmissionError> {
            self.0.discover_nodes(plan)
        }
        fn materialize(
            &self,
            plan: &crate::plan::LaunchPlan,
            topology: &crate::topology::Topology,
            artifact_dir: &std::path::Path,
        ) -> Result<Vec<crate::launcher::Artifact>, crate::launcher::ArtifactError> {
            self.0.materialize(plan, topology, artifact_dir)
        }
        fn submit(
            &self,
            plan: &crate::plan::LaunchPlan,
            artifacts: &[crate::launcher::Artifact],
        ) -> Result<String, crate::launcher::SubmissionError> {
            self.0.submit(plan, artifacts)
        }
        fn poll(
            &self,
            backend_job_id: &str,
        ) -> Result<PollStatus, crate::launcher::SubmissionError> {
            self.0.poll(backend_job_id)
        }
        fn cancel(&self, backend_job_id: &str) -> Result<(), crate::launcher::SubmissionError> {
            self.0.cancel(backend_job_id)
        }
        fn delegates_execution_retries(&self) -> bool {
            self.0.delegates_execution_retries()
        }
    }

    #[test]
    fn test_zero_budget_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("106".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "oom".to_string(),
        }));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let err = orchestrator
            .launch(&spec(0), WorkloadShape::NativeTraining)
            .unwrap_err();

        assert!(matches!(err, LaunchError::ExecutionFailed(_)));
        let record = orchestrator.status("llama-ft").unwrap();
        assert_eq!(record.state, SubmissionState::Failed);
    }

    #[test]
    fn test_stale_polls_surface_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("107".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("apiserver down".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("apiserver down".to_string()));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator
            .launch(&spec(3), WorkloadShape::NativeTraining)
            .unwrap();

        // Surfaced, not auto-retried: no retry budget was consumed.
        assert_eq!(record.state, SubmissionState::Unknown);
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_resume_without_resubmit() {
        let dir = tempfile::tempdir().unwrap();

        // First orchestrator ends with the record UNKNOWN.
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("108".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("down".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("down".to_string()));
        let orchestrator1 = orchestrator(Box::new(launcher), dir.path());
        orchestrator1
            .launch(&spec(0), WorkloadShape::NativeTraining)
            .unwrap();

        // Second orchestrator re-attaches and observes success without a
        // new submission.
        let launcher = mock(&["n0", "n1"]);
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));
        let orchestrator2 = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator2
            .resume(&spec(0), WorkloadShape::NativeTraining)
            .unwrap();

        assert_eq!(record.state, SubmissionState::Succeeded);
        assert_eq!(record.backend_job_id.as_deref(), Some("108"));
    }

    #[test]
    fn test_resume_mid_retry_resubmits_with_remaining_budget() {
        let dir = tempfile::tempdir().unwrap();

        // A crash between charging the retry and resubmitting leaves the
        // record RETRYING with the failed attempt's backend id.
        let mut record = SubmissionRecord::new(
            "llama-ft".to_string(),
            spec(2).job_key().unwrap(),
            BackendKind::Slurm,
            2,
        );
        record.accept("200".to_string()).unwrap();
        record.begin_retry("NODE_FAIL".to_string()).unwrap();
        record
            .write_to_state_dir(&dir.path().join("state"))
            .unwrap();

        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("201".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator
            .resume(&spec(2), WorkloadShape::NativeTraining)
            .unwrap();

        assert_eq!(record.state, SubmissionState::Succeeded);
        // The interrupted retry was already charged; resuming consumes
        // no further budget.
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.backend_job_id.as_deref(), Some("201"));
    }

    #[test]
    fn test_status_of_mid_retry_record_skips_polling() {
        let dir = tempfile::tempdir().unwrap();

        let mut record = SubmissionRecord::new(
            "llama-ft".to_string(),
            spec(2).job_key().unwrap(),
            BackendKind::Slurm,
            2,
        );
        record.accept("200".to_string()).unwrap();
        record.begin_retry("NODE_FAIL".to_string()).unwrap();
        record
            .write_to_state_dir(&dir.path().join("state"))
            .unwrap();

        // A poll against the dead attempt's id would report stale state.
        let launcher = mock(&["n0", "n1"]);
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Running));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        let record = orchestrator.status("llama-ft").unwrap();
        assert_eq!(record.state, SubmissionState::Retrying);
    }

    #[test]
    fn test_wait_without_backend_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(Box::new(mock(&["n0"])), dir.path());

        let mut record = SubmissionRecord::new(
            "llama-ft".to_string(),
            "k".to_string(),
            BackendKind::Slurm,
            0,
        );
        let err = orchestrator.wait(&mut record).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::State(StateError::MissingBackendJobId { .. })
        ));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("109".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("down".to_string()));
        launcher.script_poll(ScriptedPoll::Unreachable("down".to_string()));

        let orchestrator = orchestrator(Box::new(launcher), dir.path());
        orchestrator
            .launch(&spec(0), WorkloadShape::NativeTraining)
            .unwrap();

        let first = orchestrator.cancel("llama-ft").unwrap();
        assert_eq!(first.state, SubmissionState::Cancelled);

        let second = orchestrator.cancel("llama-ft").unwrap();
        assert_eq!(second.state, SubmissionState::Cancelled);
        assert_eq!(second.seq, first.seq);
    }

    #[test]
    fn test_cancel_unknown_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(Box::new(mock(&["n0"])), dir.path());
        assert!(matches!(
            orchestrator.cancel("nonexistent"),
            Err(LaunchError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_retry_rederives_checkpoint() {
        struct Latest(Arc<std::sync::Mutex<Option<String>>>);
        impl CheckpointLocator for Latest {
            fn latest(&self, _spec: &JobSpec) -> Option<String> {
                let mut guard = self.0.lock().unwrap();
                let current = guard.clone();
                // The next attempt sees a newer checkpoint.
                *guard = Some("/ckpt/step-2000".to_string());
                current
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let launcher = mock(&["n0", "n1"]);
        launcher.script_submit(ScriptedSubmit::Accept("110".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Failed {
            reason: "NODE_FAIL".to_string(),
        }));
        launcher.script_submit(ScriptedSubmit::Accept("111".to_string()));
        launcher.script_poll(ScriptedPoll::Status(PollStatus::Succeeded));

        let checkpoints = Arc::new(std::sync::Mutex::new(Some(
            "/ckpt/step-1000".to_string(),
        )));
        let orchestrator = orchestrator(Box::new(launcher), dir.path())
            .with_checkpoint_locator(Box::new(Latest(checkpoints)));

        orchestrator
            .launch(&spec(1), WorkloadShape::NativeTraining)
            .unwrap();

        // The mock writes the attempt's plan to the artifact dir.
        let first = std::fs::read_to_string(
            dir.path().join("artifacts/llama-ft/attempt-0/plan.json"),
        )
        .unwrap();
        let second = std::fs::read_to_string(
            dir.path().join("artifacts/llama-ft/attempt-1/plan.json"),
        )
        .unwrap();
        assert!(first.contains("/ckpt/step-1000"));
        assert!(second.contains("/ckpt/step-2000"));
    }
}
