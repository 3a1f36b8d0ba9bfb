//! Submission lifecycle
//!
//! Submission states: PENDING → RUNNING → {SUCCEEDED | FAILED | CANCELLED}
//! with RETRYING as the recovery loop back to PENDING and
//! EXHAUSTED_RETRIES as the terminal state once the retry budget is spent.
//! UNKNOWN marks a stale view (backend unreachable at poll time) and is
//! deliberately non-terminal: a later successful poll restores the truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Schema version for submission.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "trainlane/submission@1";

/// Global sequence counter for ordering events within a single machine
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Which execution backend a submission went to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Slurm,
    Kubernetes,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Slurm => write!(f, "slurm"),
            BackendKind::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Submission state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    /// Accepted by the backend, waiting for nodes
    Pending,
    /// At least one node is executing
    Running,
    /// All nodes exited zero
    Succeeded,
    /// Failed with no retry budget remaining, or fatally
    Failed,
    /// A retry attempt is being prepared
    Retrying,
    /// The retry budget is spent
    ExhaustedRetries,
    /// Cancelled by request
    Cancelled,
    /// The backend could not be reached at the last poll; view is stale
    Unknown,
}

impl SubmissionState {
    /// Check if this state is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Succeeded
                | SubmissionState::Failed
                | SubmissionState::ExhaustedRetries
                | SubmissionState::Cancelled
        )
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: SubmissionState) -> bool {
        use SubmissionState::*;
        match (self, target) {
            // From PENDING
            (Pending, Running) => true,
            (Pending, Succeeded) => true, // Short job finished between polls
            (Pending, Failed) => true,
            (Pending, Retrying) => true, // Transient submission failure
            (Pending, ExhaustedRetries) => true, // Failed before a RUNNING poll
            (Pending, Cancelled) => true,
            (Pending, Unknown) => true,

            // From RUNNING
            (Running, Succeeded) => true,
            (Running, Failed) => true,
            (Running, Retrying) => true,
            (Running, ExhaustedRetries) => true,
            (Running, Cancelled) => true,
            (Running, Unknown) => true,

            // From RETRYING: back through PENDING on resubmit
            (Retrying, Pending) => true,
            (Retrying, Failed) => true, // Resubmit hit a fatal error
            (Retrying, ExhaustedRetries) => true,
            (Retrying, Cancelled) => true,

            // From UNKNOWN: a successful poll restores any live or
            // terminal state
            (Unknown, Pending) => true,
            (Unknown, Running) => true,
            (Unknown, Succeeded) => true,
            (Unknown, Failed) => true,
            (Unknown, Retrying) => true,
            (Unknown, ExhaustedRetries) => true,
            (Unknown, Cancelled) => true,

            // Terminal states cannot transition
            _ => false,
        }
    }
}

/// Submission record artifact data (submission.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Job name
    pub job_name: String,

    /// Job key (deterministic hash of job inputs)
    pub job_key: String,

    /// Backend the job was submitted to
    pub backend: BackendKind,

    /// Backend-assigned job identifier, once submission succeeded
    pub backend_job_id: Option<String>,

    /// Current state
    pub state: SubmissionState,

    /// Retry attempts consumed so far
    pub retry_count: u32,

    /// Retry budget from the job spec
    pub max_retry: u32,

    /// Most recent failure text, backend wording preserved
    pub last_failure: Option<String>,

    /// When the submission was created
    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for submission record operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SubmissionState,
        to: SubmissionState,
    },

    #[error("retry budget exceeded: {retry_count} of {max_retry}")]
    RetryBudgetExceeded { retry_count: u32, max_retry: u32 },

    #[error("record for {job_name} has no backend job id")]
    MissingBackendJobId { job_name: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubmissionRecord {
    /// Create a new record in PENDING state
    pub fn new(job_name: String, job_key: String, backend: BackendKind, max_retry: u32) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            job_name,
            job_key,
            backend,
            backend_job_id: None,
            state: SubmissionState::Pending,
            retry_count: 0,
            max_retry,
            last_failure: None,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: SubmissionState) -> Result<(), StateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = Utc::now();
        self.seq = next_seq();

        Ok(())
    }

    /// Record a retry attempt: consumes one unit of budget and moves to
    /// RETRYING. Fails if the budget is already spent.
    pub fn begin_retry(&mut self, failure: String) -> Result<(), StateError> {
        if self.retry_count >= self.max_retry {
            return Err(StateError::RetryBudgetExceeded {
                retry_count: self.retry_count,
                max_retry: self.max_retry,
            });
        }
        self.transition(SubmissionState::Retrying)?;
        self.retry_count += 1;
        self.last_failure = Some(failure);
        Ok(())
    }

    /// Record acceptance by the backend: stores the backend id and moves
    /// (back) to PENDING.
    pub fn accept(&mut self, backend_job_id: String) -> Result<(), StateError> {
        if self.state != SubmissionState::Pending {
            self.transition(SubmissionState::Pending)?;
        } else {
            self.updated_at = Utc::now();
            self.seq = next_seq();
        }
        self.backend_job_id = Some(backend_job_id);
        Ok(())
    }

    /// Mark failed, preserving the backend's failure text
    pub fn fail(&mut self, failure: String) -> Result<(), StateError> {
        self.transition(SubmissionState::Failed)?;
        self.last_failure = Some(failure);
        Ok(())
    }

    /// Mark the retry budget as spent
    pub fn exhaust(&mut self, failure: String) -> Result<(), StateError> {
        self.transition(SubmissionState::ExhaustedRetries)?;
        self.last_failure = Some(failure);
        Ok(())
    }

    /// Check if the record is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Record path for a job under the state directory:
    /// <state_dir>/<job_name>/submission.json
    pub fn record_path(state_dir: &Path, job_name: &str) -> PathBuf {
        state_dir.join(job_name).join("submission.json")
    }

    /// Write to the state directory, creating the job subdirectory
    pub fn write_to_state_dir(&self, state_dir: &Path) -> Result<(), StateError> {
        let path = Self::record_path(state_dir, &self.job_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_to_file(&path)
    }
}
