//! File tools: read, write, list, find, delete inside the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::session_of;
use crate::error::WardenError;
use crate::gateway::files::parse_listing;
use crate::gateway::CommandGateway;
use crate::tools::context::ExecutionContext;
use crate::tools::definition::{
    decode_params, AccessLevel, ParamKind, ParameterSpec, ToolCategory, ToolDefinition, ToolHandler,
};

const DEFAULT_FIND_DEPTH: u32 = 8;

pub(super) fn definitions(gateway: Arc<CommandGateway>) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "read_file",
            "Read a text file from the project workspace.",
            Arc::new(ReadFileTool::new(gateway.clone())),
        )
        .with_parameters(ParameterSpec::new().required(
            "path",
            ParamKind::String,
            "Path relative to the workspace root",
        ))
        .with_category(ToolCategory::Workspace),
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a file in the project workspace.",
            Arc::new(WriteFileTool::new(gateway.clone())),
        )
        .with_parameters(
            ParameterSpec::new()
                .required("path", ParamKind::String, "Path relative to the workspace root")
                .required("content", ParamKind::String, "Full new file content"),
        )
        .with_category(ToolCategory::Workspace),
        ToolDefinition::new(
            "list_files",
            "List the entries of a directory in the workspace.",
            Arc::new(ListFilesTool::new(gateway.clone())),
        )
        .with_parameters(ParameterSpec::new().optional(
            "path",
            ParamKind::String,
            "Directory to list, defaults to the workspace root",
        ))
        .with_category(ToolCategory::Workspace),
        ToolDefinition::new(
            "find_files",
            "Find files whose name matches a glob such as *.tsx.",
            Arc::new(FindFilesTool::new(gateway.clone())),
        )
        .with_parameters(
            ParameterSpec::new()
                .required("pattern", ParamKind::String, "File name glob")
                .optional("path", ParamKind::String, "Directory to search from")
                .optional("max_depth", ParamKind::Integer, "Maximum directory depth"),
        )
        .with_category(ToolCategory::Workspace),
        ToolDefinition::new(
            "delete_file",
            "Delete a file, or a directory when recursive is set.",
            Arc::new(DeleteFileTool::new(gateway)),
        )
        .with_parameters(
            ParameterSpec::new()
                .required("path", ParamKind::String, "Path relative to the workspace root")
                .optional("recursive", ParamKind::Boolean, "Remove a directory tree"),
        )
        .with_category(ToolCategory::Workspace)
        .with_access(AccessLevel::Authenticated),
    ]
}

fn default_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_dir")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct FindParams {
    pattern: String,
    #[serde(default = "default_dir")]
    path: String,
    #[serde(default)]
    max_depth: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: String,
    #[serde(default)]
    recursive: bool,
}

pub struct ReadFileTool {
    gateway: Arc<CommandGateway>,
}

impl ReadFileTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: PathParams = decode_params(params)?;
        let session = session_of(ctx)?;
        let result = self.gateway.read_file(session, &p.path).await.into_result()?;
        Ok(json!({ "path": p.path, "content": result.stdout }))
    }
}

pub struct WriteFileTool {
    gateway: Arc<CommandGateway>,
}

impl WriteFileTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: WriteParams = decode_params(params)?;
        let session = session_of(ctx)?;
        self.gateway
            .write_file(session, &p.path, &p.content)
            .await
            .into_result()?;
        Ok(json!({ "path": p.path, "bytes_written": p.content.len() }))
    }
}

pub struct ListFilesTool {
    gateway: Arc<CommandGateway>,
}

impl ListFilesTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for ListFilesTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: ListParams = decode_params(params)?;
        let session = session_of(ctx)?;
        let result = self.gateway.list_dir(session, &p.path).await.into_result()?;
        Ok(json!({ "path": p.path, "entries": parse_listing(&result.stdout) }))
    }
}

pub struct FindFilesTool {
    gateway: Arc<CommandGateway>,
}

impl FindFilesTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for FindFilesTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: FindParams = decode_params(params)?;
        let session = session_of(ctx)?;
        let depth = p.max_depth.unwrap_or(DEFAULT_FIND_DEPTH);
        let result = self
            .gateway
            .find_files(session, &p.path, &p.pattern, depth)
            .await
            .into_result()?;

        let root = session.workspace_root.trim_end_matches('/');
        let files: Vec<&str> = result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                l.strip_prefix(root)
                    .map(|rest| rest.trim_start_matches('/'))
                    .unwrap_or(l)
            })
            .collect();
        Ok(json!({ "pattern": p.pattern, "files": files }))
    }
}

pub struct DeleteFileTool {
    gateway: Arc<CommandGateway>,
}

impl DeleteFileTool {
    pub fn new(gateway: Arc<CommandGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for DeleteFileTool {
    async fn handle(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
        let p: DeleteParams = decode_params(params)?;
        let session = session_of(ctx)?;
        self.gateway
            .delete_path(session, &p.path, p.recursive)
            .await
            .into_result()?;
        Ok(json!({ "path": p.path, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRuntime;
    use crate::runtime::RawOutput;
    use crate::session::SandboxSession;

    fn ctx() -> ExecutionContext {
        ExecutionContext::authenticated("agent")
            .with_session(SandboxSession::new("sb-1", "/workspace/proj"))
    }

    fn gateway(runtime: ScriptedRuntime) -> (Arc<ScriptedRuntime>, Arc<CommandGateway>) {
        let runtime = Arc::new(runtime);
        let gateway = Arc::new(CommandGateway::with_defaults(runtime.clone()));
        (runtime, gateway)
    }

    #[tokio::test]
    async fn test_read_file_returns_content() {
        let (_, gw) = gateway(ScriptedRuntime::new().on("cat", RawOutput::ok("fn main() {}\n")));
        let out = ReadFileTool::new(gw)
            .handle(json!({"path": "src/main.rs"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["content"], "fn main() {}\n");
    }

    #[tokio::test]
    async fn test_read_outside_workspace_is_security_violation() {
        let (rt, gw) = gateway(ScriptedRuntime::new());
        let err = ReadFileTool::new(gw)
            .handle(json!({"path": "../../etc/passwd"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "security_violation");
        assert_eq!(rt.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let (_, gw) = gateway(ScriptedRuntime::new());
        let err = ReadFileTool::new(gw)
            .handle(json!({"path": "a"}), &ExecutionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox");
    }

    #[tokio::test]
    async fn test_write_reports_bytes() {
        let (rt, gw) = gateway(ScriptedRuntime::new());
        let out = WriteFileTool::new(gw)
            .handle(json!({"path": "a.txt", "content": "hello"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 5);
        assert_eq!(rt.count_matching("warden-write"), 1);
    }

    #[tokio::test]
    async fn test_list_files_defaults_to_root() {
        let (rt, gw) = gateway(ScriptedRuntime::new().on("ls", RawOutput::ok("src/\nREADME.md\n")));
        let out = ListFilesTool::new(gw).handle(Value::Null, &ctx()).await.unwrap();
        assert_eq!(out["entries"][0]["name"], "src");
        assert_eq!(out["entries"][0]["is_dir"], true);
        assert_eq!(out["entries"][1]["is_dir"], false);
        assert_eq!(
            rt.calls()[0].command,
            vec!["ls", "-1Ap", "--", "/workspace/proj"]
        );
    }

    #[tokio::test]
    async fn test_find_files_relative_results() {
        let (_, gw) = gateway(ScriptedRuntime::new().on(
            "find",
            RawOutput::ok("/workspace/proj/src/App.tsx\n/workspace/proj/src/ui/Nav.tsx\n"),
        ));
        let out = FindFilesTool::new(gw)
            .handle(json!({"pattern": "*.tsx"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["files"], json!(["src/App.tsx", "src/ui/Nav.tsx"]));
    }

    #[tokio::test]
    async fn test_delete_file_nonrecursive() {
        let (rt, gw) = gateway(ScriptedRuntime::new());
        DeleteFileTool::new(gw)
            .handle(json!({"path": "old.txt"}), &ctx())
            .await
            .unwrap();
        assert_eq!(
            rt.calls()[0].command,
            vec!["rm", "-f", "--", "/workspace/proj/old.txt"]
        );
    }
}
