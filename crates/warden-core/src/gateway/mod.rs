//! Command execution gateway.
//!
//! Every sandbox operation passes through [`CommandGateway::execute`]:
//! the guard validates the command and working directory, the runtime runs
//! it under a timeout, and the outcome is normalized into an
//! [`ExecutionResult`]. File operations in [`files`] are request builders on
//! top of the same primitive.

pub mod files;
pub mod request;

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::WardenError;
use crate::guard::GuardPolicy;
use crate::obs;
use crate::runtime::{RawOutput, SandboxRuntime};
use crate::session::SandboxSession;

pub use files::DirEntry;
pub use request::{ExecutionRequest, ExecutionResult};

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Guarded proxy in front of a [`SandboxRuntime`].
pub struct CommandGateway {
    runtime: Arc<dyn SandboxRuntime>,
    guard: GuardPolicy,
    config: GatewayConfig,
}

impl CommandGateway {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, guard: GuardPolicy, config: GatewayConfig) -> Self {
        Self {
            runtime,
            guard,
            config,
        }
    }

    /// Gateway with the standard guard and default settings.
    pub fn with_defaults(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self::new(runtime, GuardPolicy::standard(), GatewayConfig::default())
    }

    pub fn guard(&self) -> &GuardPolicy {
        &self.guard
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.config.default_timeout_ms
    }

    /// Validate and run `request` in `session`'s sandbox.
    ///
    /// `timeout_ms` of `None` uses the configured default.
    pub async fn execute(
        &self,
        session: &SandboxSession,
        request: &ExecutionRequest,
        timeout_ms: Option<u64>,
    ) -> ExecutionResult {
        if let Err(err) = self.admit(session, request) {
            if let WardenError::SecurityViolation { reason } = &err {
                obs::emit_gateway_denied(&session.sandbox_id, reason);
            }
            return ExecutionResult::rejected(err);
        }

        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let argv = request.argv();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.runtime
                .execute(&request.sandbox_id, &argv, &request.working_directory),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_elapsed) => {
                obs::emit_gateway_timeout(&session.sandbox_id, timeout_ms);
                ExecutionResult {
                    duration_ms,
                    ..ExecutionResult::rejected(WardenError::ExecutionTimeout { timeout_ms })
                }
            }
            Ok(Err(runtime_err)) => ExecutionResult {
                duration_ms,
                ..ExecutionResult::rejected(WardenError::Sandbox {
                    reason: runtime_err.to_string(),
                })
            },
            Ok(Ok(raw)) => {
                debug!(
                    sandbox_id = %session.sandbox_id,
                    exit_code = ?raw.exit_code,
                    duration_ms,
                    "sandbox command finished"
                );
                self.normalize(raw, duration_ms)
            }
        }
    }

    /// Run an argv in the workspace root (or `cwd`, resolved under it).
    pub async fn run(
        &self,
        session: &SandboxSession,
        command: Vec<String>,
        cwd: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> ExecutionResult {
        let working_directory = match cwd {
            Some(dir) => match self.guard.check_path(dir, &session.workspace_root) {
                Ok(resolved) => resolved.display().to_string(),
                Err(v) => return ExecutionResult::rejected(v.into()),
            },
            None => session.workspace_root.clone(),
        };
        let request = ExecutionRequest::new(session.sandbox_id.clone(), command, working_directory);
        self.execute(session, &request, timeout_ms).await
    }

    fn admit(&self, session: &SandboxSession, request: &ExecutionRequest) -> Result<(), WardenError> {
        if request.sandbox_id != session.sandbox_id {
            return Err(WardenError::security(format!(
                "request targets sandbox {} but session is {}",
                request.sandbox_id, session.sandbox_id
            )));
        }
        if !session.is_running() {
            return Err(WardenError::Sandbox {
                reason: format!("sandbox {} is {}", session.sandbox_id, session.status),
            });
        }
        self.guard
            .check_command_in(&request.command, &session.workspace_root)?;
        self.guard
            .check_path(&request.working_directory, &session.workspace_root)?;
        if let Some(bad) = request.data_args.iter().find(|a| !is_encoded_payload(a)) {
            return Err(WardenError::security(format!(
                "data argument of {} bytes is not a base64 payload",
                bad.len()
            )));
        }
        Ok(())
    }

    fn normalize(&self, raw: RawOutput, duration_ms: u64) -> ExecutionResult {
        let success = raw.success && raw.exit_code.map_or(true, |c| c == 0) && raw.error.is_none();
        let stdout = truncate_output(raw.stdout, self.config.max_output_bytes);
        let stderr = truncate_output(raw.stderr, self.config.max_output_bytes);
        let error = if success {
            None
        } else {
            Some(WardenError::failed(failure_reason(&raw.error, &stderr, raw.exit_code)))
        };
        ExecutionResult {
            success,
            stdout,
            stderr,
            exit_code: raw.exit_code,
            error,
            duration_ms,
        }
    }
}

/// Data arguments only ever carry standard base64.
fn is_encoded_payload(arg: &str) -> bool {
    BASE64.decode(arg.as_bytes()).is_ok()
}

fn failure_reason(error: &Option<String>, stderr: &str, exit_code: Option<i32>) -> String {
    if let Some(err) = error {
        return err.clone();
    }
    let first_line = stderr.lines().map(str::trim).find(|l| !l.is_empty());
    match (first_line, exit_code) {
        (Some(line), Some(code)) => format!("exit code {code}: {line}"),
        (Some(line), None) => line.to_string(),
        (None, Some(code)) => format!("exit code {code}"),
        (None, None) => "command failed".to_string(),
    }
}

fn truncate_output(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRuntime;
    use crate::runtime::RuntimeError;
    use crate::session::SessionStatus;

    fn session() -> SandboxSession {
        SandboxSession::new("sb-1", "/workspace/proj")
    }

    #[tokio::test]
    async fn test_denied_command_never_reaches_sandbox() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let req = ExecutionRequest::in_workspace(&s, ["rm", "-rf", "/"]);

        let res = gateway.execute(&s, &req, None).await;
        assert!(!res.success);
        assert!(matches!(res.error, Some(WardenError::SecurityViolation { .. })));
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_shell_text_in_data_arg_never_reaches_sandbox() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let req = ExecutionRequest::in_workspace(&s, ["sh", "-c"])
            .with_data_arg("rm -rf / && cat /etc/shadow");

        let res = gateway.execute(&s, &req, None).await;
        assert!(matches!(res.error, Some(WardenError::SecurityViolation { .. })));
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_base64_data_arg_is_passed_through() {
        let runtime = Arc::new(ScriptedRuntime::new().on("printf", RawOutput::ok("")));
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let req = ExecutionRequest::in_workspace(&s, ["sh", "-c", "printf '%s' \"$1\"", "w"])
            .with_data_arg(BASE64.encode("hi"));

        assert!(gateway.execute(&s, &req, None).await.success);
        assert_eq!(runtime.calls()[0].command.last().map(String::as_str), Some("aGk="));
    }

    #[tokio::test]
    async fn test_command_paths_beside_workspace_denied() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        for command in [
            vec!["cat", "/workspace/other/.env"],
            vec!["sh", "-c", "cat /workspace/other/.env"],
            vec!["cp", "-r", "/home", "."],
            vec!["cat", "/home/bob/.ssh/id_rsa"],
        ] {
            let res = gateway
                .execute(&s, &ExecutionRequest::in_workspace(&s, command.clone()), None)
                .await;
            assert!(
                matches!(res.error, Some(WardenError::SecurityViolation { .. })),
                "{command:?} should be denied"
            );
        }
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_working_directory_outside_workspace_denied() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let req = ExecutionRequest::new("sb-1", vec!["ls".into()], "/tmp");

        let res = gateway.execute(&s, &req, None).await;
        assert!(matches!(res.error, Some(WardenError::SecurityViolation { .. })));
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_sandbox_denied() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let req = ExecutionRequest::new("sb-other", vec!["ls".into()], "/workspace/proj");
        let res = gateway.execute(&session(), &req, None).await;
        assert!(matches!(res.error, Some(WardenError::SecurityViolation { .. })));
    }

    #[tokio::test]
    async fn test_stopped_session_is_sandbox_error() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let mut s = session();
        s.status = SessionStatus::Stopped;
        let req = ExecutionRequest::in_workspace(&s, ["ls"]);
        let res = gateway.execute(&s, &req, None).await;
        assert!(matches!(res.error, Some(WardenError::Sandbox { .. })));
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_is_normalized() {
        let runtime = Arc::new(ScriptedRuntime::new().on("echo", RawOutput::ok("hello\n")));
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let res = gateway
            .execute(&s, &ExecutionRequest::in_workspace(&s, ["echo", "hello"]), None)
            .await;
        assert!(res.success);
        assert_eq!(res.stdout, "hello\n");
        assert_eq!(res.exit_code, Some(0));
        assert!(res.error.is_none());

        let calls = runtime.calls();
        assert_eq!(calls[0].command, vec!["echo", "hello"]);
        assert_eq!(calls[0].working_directory, "/workspace/proj");
    }

    #[tokio::test]
    async fn test_nonzero_exit_becomes_execution_failed() {
        let runtime = Arc::new(
            ScriptedRuntime::new().on("cat", RawOutput::exit(1, "cat: x: No such file\n")),
        );
        let gateway = CommandGateway::with_defaults(runtime);
        let s = session();
        let res = gateway
            .execute(&s, &ExecutionRequest::in_workspace(&s, ["cat", "x"]), None)
            .await;
        assert!(!res.success);
        match res.error {
            Some(WardenError::ExecutionFailed { reason }) => {
                assert!(reason.contains("exit code 1"));
                assert!(reason.contains("No such file"));
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_execution_timeout() {
        let runtime = Arc::new(ScriptedRuntime::new().with_delay(Duration::from_secs(60)));
        let gateway = CommandGateway::with_defaults(runtime);
        let s = session();
        let res = gateway
            .execute(&s, &ExecutionRequest::in_workspace(&s, ["sleep", "60"]), Some(50))
            .await;
        assert_eq!(
            res.error,
            Some(WardenError::ExecutionTimeout { timeout_ms: 50 })
        );
        assert!(res.error.unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_runtime_error_becomes_sandbox_error() {
        let runtime = Arc::new(ScriptedRuntime::new().fail_on(
            "ls",
            RuntimeError::Unavailable {
                sandbox_id: "sb-1".into(),
                reason: "container gone".into(),
            },
        ));
        let gateway = CommandGateway::with_defaults(runtime);
        let s = session();
        let res = gateway
            .execute(&s, &ExecutionRequest::in_workspace(&s, ["ls"]), None)
            .await;
        match res.error {
            Some(WardenError::Sandbox { reason }) => assert!(reason.contains("container gone")),
            other => panic!("expected Sandbox error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_resolves_relative_cwd() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gateway = CommandGateway::with_defaults(runtime.clone());
        let s = session();
        let res = gateway.run(&s, vec!["ls".into()], Some("src"), None).await;
        assert!(res.success);
        assert_eq!(runtime.calls()[0].working_directory, "/workspace/proj/src");

        let res = gateway.run(&s, vec!["ls".into()], Some("../x"), None).await;
        assert!(!res.success);
        assert_eq!(runtime.call_count(), 1);
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let text = "ééééé".to_string();
        let out = truncate_output(text, 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with("[output truncated]"));
        assert_eq!(truncate_output("short".into(), 100), "short");
    }
}
