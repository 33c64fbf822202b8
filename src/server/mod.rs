//! Lifecycle management for the external recognition server process
//!
//! The server is a prebuilt binary shipped alongside the application with
//! its model artifacts. This module locates those resources, launches the
//! process with its fixed argument set, watches for exit, and exposes the
//! running/stopped status the UI polls.

mod resources;
mod supervisor;

pub use resources::{ModelPaths, ResourceLayout, SERVER_BINARY_NAME};
pub use supervisor::{ServerStatus, ServerSupervisor};

use std::path::PathBuf;

/// Errors that can occur while preparing or launching the server.
#[derive(Debug, Clone)]
pub enum SupervisorError {
    /// Server binary not found at its expected location
    MissingBinary(PathBuf),
    /// A required model artifact is not present
    MissingModel(PathBuf),
    /// Process could not be spawned
    SpawnFailed(String),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::MissingBinary(path) => {
                write!(f, "Server binary not found: {}", path.display())
            }
            SupervisorError::MissingModel(path) => {
                write!(f, "Model file not found: {}", path.display())
            }
            SupervisorError::SpawnFailed(e) => write!(f, "Failed to start server: {}", e),
        }
    }
}

impl std::error::Error for SupervisorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_display() {
        let err = SupervisorError::MissingBinary(PathBuf::from("/opt/app/binaries/x"));
        assert!(err.to_string().contains("/opt/app/binaries/x"));

        let err = SupervisorError::MissingModel(PathBuf::from("/opt/app/models/tokens.txt"));
        assert!(err.to_string().contains("tokens.txt"));

        let err = SupervisorError::SpawnFailed("permission denied".to_string());
        assert!(err.to_string().contains("permission denied"));
    }
}
