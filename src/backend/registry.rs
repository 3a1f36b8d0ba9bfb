//! Container registry login
//!
//! Authenticates the container runtime against the registry an image
//! lives in before any node pulls it. Auth rejections are classified
//! separately from connectivity failures: a bad credential will not heal
//! on retry.

use std::process::Command;

use super::{run_checked, BackendError, RegistryClient};

/// Registry host for an image reference: the part before the first '/'
/// when it looks like a host (contains '.' or ':'), otherwise the default
/// public registry.
pub(crate) fn registry_host(image: &str) -> &str {
    match image.split('/').next() {
        Some(first) if first.contains('.') || first.contains(':') => first,
        _ => "docker.io",
    }
}

/// Registry client that drives `docker login` with ambient credentials
#[derive(Debug, Clone, Default)]
pub struct CliRegistryClient;

impl CliRegistryClient {
    pub fn new() -> Self {
        Self
    }
}

impl RegistryClient for CliRegistryClient {
    fn login(&self, image: &str) -> Result<(), BackendError> {
        let host = registry_host(image);
        tracing::debug!(registry = %host, "logging in to registry");

        match run_checked(Command::new("docker").args(["login", host])) {
            Ok(_) => Ok(()),
            Err(BackendError::Unavailable { stderr, .. })
                if stderr.contains("unauthorized")
                    || stderr.contains("denied")
                    || stderr.contains("authentication required") =>
            {
                Err(BackendError::RegistryAuth { stderr })
            }
            Err(err) => Err(err),
        }
    }
}
