//! The raw sandbox execute primitive consumed by the gateway.
//!
//! - [`SandboxRuntime`]: `execute(sandbox_id, argv, cwd)` contract
//! - [`docker`]: `docker exec` implementation

pub mod docker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use docker::DockerRuntime;

/// Unprocessed outcome of one command inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl RawOutput {
    /// Exit status 0 with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: code == 0,
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

/// The runtime could not run the command at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("sandbox {sandbox_id} unavailable: {reason}")]
    Unavailable { sandbox_id: String, reason: String },

    #[error("failed to spawn sandbox command: {0}")]
    Spawn(String),
}

/// Runs an argv-style command inside a sandbox.
///
/// Implementations must not interpret `command` through a shell.
#[async_trait]
pub trait SandboxRuntime: Send + Sync + 'static {
    async fn execute(
        &self,
        sandbox_id: &str,
        command: &[String],
        working_directory: &str,
    ) -> Result<RawOutput, RuntimeError>;
}
