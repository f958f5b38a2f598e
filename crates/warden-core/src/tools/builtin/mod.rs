//! Built-in tools backed by the command gateway and lifecycle controller.

mod process;
mod workspace;

use std::sync::Arc;

use crate::error::WardenError;
use crate::gateway::CommandGateway;
use crate::lifecycle::LifecycleController;
use crate::session::SandboxSession;

use super::context::ExecutionContext;
use super::dispatcher::ToolDispatcher;

pub use process::{DevServerAction, DevServerTool, RunCommandTool};
pub use workspace::{DeleteFileTool, FindFilesTool, ListFilesTool, ReadFileTool, WriteFileTool};

/// Register every built-in tool. Returns the ids in registration order.
pub async fn register_builtin_tools(
    dispatcher: &ToolDispatcher,
    gateway: Arc<CommandGateway>,
    lifecycle: Arc<LifecycleController>,
) -> Vec<String> {
    let mut tools = workspace::definitions(gateway.clone());
    tools.push(process::run_command_definition(gateway));
    tools.extend(process::dev_server_definitions(lifecycle));

    let mut ids = Vec::with_capacity(tools.len());
    for tool in tools {
        ids.push(tool.id.clone());
        dispatcher.register(tool).await;
    }
    ids
}

/// The sandbox a call operates on.
fn session_of(ctx: &ExecutionContext) -> Result<&SandboxSession, WardenError> {
    ctx.session.as_ref().ok_or_else(|| WardenError::Sandbox {
        reason: "no sandbox session attached to this call".to_string(),
    })
}
