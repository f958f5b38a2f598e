//! Execution request and normalized result types.

use serde::{Deserialize, Serialize};

use crate::error::WardenError;
use crate::session::SandboxSession;

/// One command to run inside a sandbox.
///
/// `command` is argv-style and is checked by the guard. `data_args` are
/// appended after validation: they carry base64 payloads (encoded file
/// content) that reach the program only as positional parameters. Only the
/// gateway's own builders can attach them, and they never deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub sandbox_id: String,
    pub command: Vec<String>,
    pub working_directory: String,
    #[serde(skip)]
    pub(crate) data_args: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(
        sandbox_id: impl Into<String>,
        command: Vec<String>,
        working_directory: impl Into<String>,
    ) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            command,
            working_directory: working_directory.into(),
            data_args: Vec::new(),
        }
    }

    /// Request rooted at the session's workspace.
    pub fn in_workspace<S: Into<String>>(
        session: &SandboxSession,
        command: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            session.sandbox_id.clone(),
            command.into_iter().map(Into::into).collect(),
            session.workspace_root.clone(),
        )
    }

    pub(crate) fn with_data_arg(mut self, data: impl Into<String>) -> Self {
        self.data_args.push(data.into());
        self
    }

    /// Full argv handed to the runtime.
    pub fn argv(&self) -> Vec<String> {
        self.command
            .iter()
            .chain(self.data_args.iter())
            .cloned()
            .collect()
    }
}

/// Normalized outcome of a sandboxed command. Never a raw fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<WardenError>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Failure that never reached the sandbox.
    pub fn rejected(error: WardenError) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error),
            duration_ms: 0,
        }
    }

    /// The error, or the failure text, as a single line for display.
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(match &self.error {
            Some(err) => err.to_string(),
            None => format!("command failed with exit code {:?}", self.exit_code),
        })
    }

    /// Convert to `Result`, keeping the whole result on success.
    pub fn into_result(self) -> Result<Self, WardenError> {
        if self.success {
            Ok(self)
        } else {
            Err(self
                .error
                .clone()
                .unwrap_or_else(|| WardenError::failed(format!("exit code {:?}", self.exit_code))))
        }
    }
}
