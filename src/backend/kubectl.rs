//! kubectl-backed cluster API
//!
//! Applies manifests and reads status by shelling out to `kubectl`,
//! feeding manifests over stdin so nothing touches disk outside the
//! launcher's own artifact directory.

use std::io::Write as _;
use std::process::{Command, Stdio};

use super::{BackendError, ClusterBackend};

/// Cluster backend that drives the `kubectl` binary
#[derive(Debug, Clone, Default)]
pub struct Kubectl {
    namespace: Option<String>,
}

impl Kubectl {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new("kubectl");
        if let Some(namespace) = &self.namespace {
            command.args(["-n", namespace]);
        }
        command
    }
}

/// Like `run_checked`, but with a stdin payload for `kubectl apply -f -`.
fn run_with_stdin(command: &mut Command, payload: &[u8]) -> Result<String, BackendError> {
    let program = command.get_program().to_string_lossy().to_string();
    tracing::debug!(program = %program, "invoking backend CLI");

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(payload)
            .map_err(|source| BackendError::Spawn {
                program: program.clone(),
                source,
            })?;
    }

    let output = child
        .wait_with_output()
        .map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(BackendError::Unavailable {
            program,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(stdout)
}

impl ClusterBackend for Kubectl {
    fn apply(&self, manifest: &serde_json::Value) -> Result<String, BackendError> {
        let payload = serde_json::to_vec(manifest).map_err(|e| BackendError::MalformedOutput {
            program: "kubectl".to_string(),
            output: e.to_string(),
        })?;

        run_with_stdin(
            self.base_command().args(["apply", "-f", "-"]),
            &payload,
        )?;

        let name = manifest
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BackendError::MalformedOutput {
                program: "kubectl".to_string(),
                output: "manifest missing metadata.name".to_string(),
            })?;

        tracing::info!(resource = %name, "applied manifest");
        Ok(name.to_string())
    }

    fn read_status(&self, kind: &str, name: &str) -> Result<serde_json::Value, BackendError> {
        let stdout = match super::run_checked(
            self.base_command().args(["get", kind, name, "-o", "json"]),
        ) {
            Ok(stdout) => stdout,
            Err(BackendError::Unavailable { stderr, .. }) if stderr.contains("NotFound") => {
                return Ok(serde_json::Value::Null);
            }
            Err(err) => return Err(err),
        };

        serde_json::from_str(&stdout).map_err(|_| BackendError::MalformedOutput {
            program: "kubectl".to_string(),
            output: stdout.chars().take(200).collect(),
        })
    }

    fn delete(&self, kind: &str, name: &str) -> Result<(), BackendError> {
        match super::run_checked(
            self.base_command()
                .args(["delete", kind, name, "--ignore-not-found"]),
        ) {
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
