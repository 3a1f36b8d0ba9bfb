//! Trainlane - distributed training launch orchestrator
//!
//! This crate turns a declarative training job description into a
//! running multi-node job on a Slurm cluster or a Kubernetes cluster,
//! and drives it through submission, polling, bounded retry, and
//! cancellation.

pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod launcher;
pub mod mock;
pub mod orchestrator;
pub mod plan;
pub mod retry;
pub mod stage;
pub mod submission;
pub mod topology;

pub use config::{resolve, ConfigError, Recipe};
pub use error::LaunchError;
pub use job::JobSpec;
pub use launcher::{KubernetesLauncher, Launcher, SlurmLauncher};
pub use orchestrator::Orchestrator;
pub use plan::LaunchPlan;
pub use retry::RetryPolicy;
pub use stage::{Stage, WorkloadShape};
pub use submission::{BackendKind, SubmissionRecord, SubmissionState};
pub use topology::{NodeCoordinator, Topology};
