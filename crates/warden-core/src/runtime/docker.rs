//! `docker exec` backed runtime.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{RawOutput, RuntimeError, SandboxRuntime};

/// Executes commands in running containers through the docker CLI.
///
/// The container id is the sandbox id. Dropping the future (gateway timeout)
/// kills the local `docker exec` client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker_bin: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Arguments passed to the docker binary for one exec.
    pub fn exec_args(sandbox_id: &str, command: &[String], working_directory: &str) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-w".to_string(),
            working_directory.to_string(),
            sandbox_id.to_string(),
        ];
        args.extend(command.iter().cloned());
        args
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn execute(
        &self,
        sandbox_id: &str,
        command: &[String],
        working_directory: &str,
    ) -> Result<RawOutput, RuntimeError> {
        let args = Self::exec_args(sandbox_id, command, working_directory);
        debug!(sandbox_id = %sandbox_id, argv = ?command, "docker exec");

        let child = Command::new(&self.docker_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        // docker reports a missing or stopped container with these prefixes
        if stderr.starts_with("Error response from daemon")
            || stderr.starts_with("Error: No such container")
        {
            return Err(RuntimeError::Unavailable {
                sandbox_id: sandbox_id.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(RawOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_code: output.status.code(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_args_layout() {
        let args = DockerRuntime::exec_args(
            "ctr-1",
            &["ls".to_string(), "-la".to_string()],
            "/workspace/app",
        );
        assert_eq!(args, vec!["exec", "-w", "/workspace/app", "ctr-1", "ls", "-la"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runtime = DockerRuntime::new("/nonexistent/docker-binary");
        let err = runtime
            .execute("ctr", &["true".to_string()], "/")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn(_)));
    }
}
