//! Process tools: arbitrary guarded commands and the dev-server lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::session_of;
use crate::error::WardenError;
use crate::gateway::CommandGateway;
use crate::lifecycle::LifecycleController;
use crate::tools::context::ExecutionContext;
use crate::tools::definition::{
    decode_params, AccessLevel, ParamKind, ParameterSpec, ToolCategory, ToolDefinition, ToolHandler,
    ValidationOutcome,
};

const DEFAULT_LOG_LINES: usize = 50;

pub(super) fn run_command_definition(gateway: Arc<CommandGateway>) -> ToolDefinition {
    ToolDefinition::new(
        "run_command",
        "Run a command (argv list) inside the sandbox workspace.",
        Arc::new(RunCommandTool::new(gateway)),
    )
    .with_parameters(
        ParameterSpec::new()
            .required("command", ParamKind::Array, "Program and arguments, e.g. [\"npm\", \"test\"]")
            .optional("cwd", ParamKind::String, "Working directory relative to the workspace root")
            .optional("timeout_ms", ParamKind::Integer, "Timeout in milliseconds"),
    )
    .with_validator(|params: &Value| {
        let ok = params["command"]
            .as_array()
            .map_or(false, |argv| !argv.is_empty() && argv.iter().all(Value::is_string));
        if ok {
            ValidationOutcome::valid()
        } else {
            ValidationOutcome::invalid("command must be a non-empty list of strings")
        }
    })
    .with_category(ToolCategory::Process)
    .with_access(AccessLevel::Authenticated)
    .with_rate_limit(60, 60_000)
}

pub(super) fn dev_server_definitions(lifecycle: Arc<LifecycleController>) -> Vec<ToolDefinition> {
    let tool = |action: DevServerAction| Arc::new(DevServerTool::new(lifecycle.clone(), action));
    vec![
        ToolDefinition::new(
            "start_dev_server",
            "Start the project's dev server if it is not already running.",
            tool(DevServerAction::Start),
        )
        .with_category(ToolCategory::Process),
        ToolDefinition::new(
            "stop_dev_server",
            "Stop the project's dev server.",
            tool(DevServerAction::Stop),
        )
        .with_category(ToolCategory::Process),
        ToolDefinition::new(
            "restart_dev_server",
            "Restart the dev server. Refused while the restart circuit breaker is open.",
            tool(DevServerAction::Restart),
        )
        .with_parameters(ParameterSpec::new().optional(
            "reason",
            ParamKind::String,
            "Why the restart is needed",
        ))
        .with_category(ToolCategory::Process),
        ToolDefinition::new(
            "dev_server_status",
            "Report whether the dev server runs and where it is reachable.",
            tool(DevServerAction::Status),
        )
        .with_category(ToolCategory::Diagnostics),
        ToolDefinition::new(
            "dev_server_logs",
            "Show the last lines of the dev server log.",
            tool(DevServerAction::Logs),
        )
        .with_parameters(ParameterSpec::new().optional(
            "lines",
            ParamKind::Integer,
            "Number of lines, default 50",
        ))
        .with_category(ToolCategory::Diagnostics),
    ]
}

#[derive(Debug, Deserialize)]
struct RunParams {
    command: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct RunCommandTool {
    gateway: Arc<CommandGateway>,
}

impl RunCommandTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for RunCommandTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: RunParams = decode_params(params)?;
        let session = session_of(ctx)?;
        let result = self
            .gateway
            .run(session, p.command, p.cwd.as_deref(), p.timeout_ms)
            .await
            .into_result()?;
        Ok(json!({
            "stdout": result.stdout,
            "stderr": result.stderr,
            "exit_code": result.exit_code,
            "duration_ms": result.duration_ms,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevServerAction {
    Start,
    Stop,
    Restart,
    Status,
    Logs,
}

#[derive(Debug, Default, Deserialize)]
struct DevServerParams {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    lines: Option<usize>,
}

/// One lifecycle operation exposed as a tool.
pub struct DevServerTool {
    lifecycle: Arc<LifecycleController>,
    action: DevServerAction,
}

impl DevServerTool {
    pub fn new(lifecycle: Arc<LifecycleController>, action: DevServerAction) -> Self {
        Self { lifecycle, action }
    }
}

#[async_trait]
impl ToolHandler for DevServerTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: DevServerParams = decode_params(params)?;
        let session = session_of(ctx)?;
        let ctl = &self.lifecycle;
        match self.action {
            DevServerAction::Start => {
                let status = ctl.start(session).await?;
                Ok(json!({ "message": "dev server running", "status": status }))
            }
            DevServerAction::Stop => {
                ctl.stop(session).await?;
                Ok(json!({ "message": "dev server stopped" }))
            }
            DevServerAction::Restart => {
                let status = ctl.restart(session, p.reason.as_deref()).await?;
                Ok(json!({ "message": "dev server restarted", "status": status }))
            }
            DevServerAction::Status => {
                let status = ctl.check_status(session).await?;
                Ok(json!({
                    "state": ctl.state(&session.sandbox_id).await,
                    "status": status,
                    "restart_governor": ctl.governor_snapshot(&session.sandbox_id).await,
                }))
            }
            DevServerAction::Logs => {
                let lines = p.lines.unwrap_or(DEFAULT_LOG_LINES);
                let log = ctl.logs(session, lines).await?;
                Ok(json!({ "lines": lines, "log": log }))
            }
        }
    }
}
