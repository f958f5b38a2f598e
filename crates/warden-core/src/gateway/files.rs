//! File operation request builders.
//!
//! Each builder re-checks its own path arguments against the workspace root
//! before composing the command, since the paths it emits are derived.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{CommandGateway, ExecutionRequest, ExecutionResult};
use crate::error::WardenError;
use crate::session::SandboxSession;

/// Writes `$2` (base64) to `$1`, creating parent directories.
const WRITE_SCRIPT: &str =
    r#"mkdir -p -- "$(dirname -- "$1")" && printf '%s' "$2" | base64 -d > "$1""#;

/// Directories skipped by `find_files`.
const FIND_EXCLUDES: &[&str] = &["*/node_modules/*", "*/.git/*"];

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Parse `ls -1Ap` output: one name per line, directories end in `/`.
pub fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(dir) => DirEntry {
                name: dir.to_string(),
                is_dir: true,
            },
            None => DirEntry {
                name: line.to_string(),
                is_dir: false,
            },
        })
        .collect()
}

impl CommandGateway {
    fn resolve(&self, session: &SandboxSession, path: &str) -> Result<String, ExecutionResult> {
        self.guard
            .check_path(path, &session.workspace_root)
            .map(|p| p.display().to_string())
            .map_err(|v| ExecutionResult::rejected(v.into()))
    }

    pub async fn read_file(&self, session: &SandboxSession, path: &str) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        let req = ExecutionRequest::in_workspace(session, ["cat", "--", abs.as_str()]);
        self.execute(session, &req, None).await
    }

    /// Write `content` to `path`. The content travels base64-encoded as a
    /// positional argument so it is never parsed by the shell.
    pub async fn write_file(
        &self,
        session: &SandboxSession,
        path: &str,
        content: &str,
    ) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        if std::path::Path::new(&abs) == std::path::Path::new(&session.workspace_root) {
            return ExecutionResult::rejected(WardenError::security(
                "cannot overwrite the workspace root",
            ));
        }
        let req = ExecutionRequest::in_workspace(
            session,
            ["sh", "-c", WRITE_SCRIPT, "warden-write", abs.as_str()],
        )
        .with_data_arg(BASE64.encode(content.as_bytes()));
        self.execute(session, &req, None).await
    }

    pub async fn list_dir(&self, session: &SandboxSession, path: &str) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        let req = ExecutionRequest::in_workspace(session, ["ls", "-1Ap", "--", abs.as_str()]);
        self.execute(session, &req, None).await
    }

    /// Files under `dir` whose name matches the shell glob `name_pattern`.
    pub async fn find_files(
        &self,
        session: &SandboxSession,
        dir: &str,
        name_pattern: &str,
        max_depth: u32,
    ) -> ExecutionResult {
        let abs = match self.resolve(session, dir) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        if name_pattern.is_empty() || name_pattern.contains('/') {
            return ExecutionResult::rejected(WardenError::validation(
                "name pattern must be a non-empty file name glob",
            ));
        }
        let depth = max_depth.max(1).to_string();
        let mut command: Vec<String> = vec![
            "find".into(),
            abs,
            "-maxdepth".into(),
            depth,
            "-name".into(),
            name_pattern.into(),
        ];
        for exclude in FIND_EXCLUDES {
            command.extend(["-not".into(), "-path".into(), (*exclude).to_string()]);
        }
        let req = ExecutionRequest::new(
            session.sandbox_id.clone(),
            command,
            session.workspace_root.clone(),
        );
        self.execute(session, &req, None).await
    }

    /// Remove a file, or a directory tree when `recursive`.
    pub async fn delete_path(
        &self,
        session: &SandboxSession,
        path: &str,
        recursive: bool,
    ) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        if std::path::Path::new(&abs) == std::path::Path::new(&session.workspace_root) {
            return ExecutionResult::rejected(WardenError::security(
                "cannot delete the workspace root",
            ));
        }
        let flag = if recursive { "-r" } else { "-f" };
        let req = ExecutionRequest::in_workspace(session, ["rm", flag, "--", abs.as_str()]);
        self.execute(session, &req, None).await
    }

    pub async fn make_dir(&self, session: &SandboxSession, path: &str) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        let req = ExecutionRequest::in_workspace(session, ["mkdir", "-p", "--", abs.as_str()]);
        self.execute(session, &req, None).await
    }

    pub async fn tail_file(
        &self,
        session: &SandboxSession,
        path: &str,
        lines: usize,
    ) -> ExecutionResult {
        let abs = match self.resolve(session, path) {
            Ok(p) => p,
            Err(rejected) => return rejected,
        };
        let count = lines.max(1).to_string();
        let req = ExecutionRequest::in_workspace(
            session,
            ["tail", "-n", count.as_str(), "--", abs.as_str()],
        );
        self.execute(session, &req, None).await
    }
}
