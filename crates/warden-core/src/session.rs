//! Sandbox sessions and the keyed session registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Lifecycle status of an attached sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// A project attached to a sandbox. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSession {
    pub sandbox_id: String,
    /// The only directory tree the guard lets operations touch.
    pub workspace_root: String,
    pub status: SessionStatus,
    pub attached_at: DateTime<Utc>,
}

impl SandboxSession {
    pub fn new(sandbox_id: impl Into<String>, workspace_root: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            workspace_root: workspace_root.into(),
            status: SessionStatus::Running,
            attached_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }
}

/// In-memory registry of attached sandboxes, keyed by sandbox id.
///
/// Owned by the process entry point and passed by reference; sessions are
/// handed out as clones so callers never hold the lock across I/O.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SandboxSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session, replacing any previous one with the same id.
    pub async fn attach(&self, session: SandboxSession) -> Option<SandboxSession> {
        info!(sandbox_id = %session.sandbox_id, root = %session.workspace_root, "sandbox attached");
        self.sessions
            .write()
            .await
            .insert(session.sandbox_id.clone(), session)
    }

    pub async fn get(&self, sandbox_id: &str) -> Option<SandboxSession> {
        self.sessions.read().await.get(sandbox_id).cloned()
    }

    /// Update the status of an attached session. Returns `false` if unknown.
    pub async fn set_status(&self, sandbox_id: &str, status: SessionStatus) -> bool {
        match self.sessions.write().await.get_mut(sandbox_id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn detach(&self, sandbox_id: &str) -> Option<SandboxSession> {
        let removed = self.sessions.write().await.remove(sandbox_id);
        if removed.is_some() {
            info!(sandbox_id = %sandbox_id, "sandbox detached");
        }
        removed
    }

    /// All sessions, sorted by sandbox id.
    pub async fn list(&self) -> Vec<SandboxSession> {
        let mut all: Vec<_> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.sandbox_id.cmp(&b.sandbox_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attach_get_detach() {
        let registry = SessionRegistry::new();
        assert!(registry
            .attach(SandboxSession::new("sb-1", "/workspace/a"))
            .await
            .is_none());
        let got = registry.get("sb-1").await.unwrap();
        assert_eq!(got.workspace_root, "/workspace/a");
        assert!(got.is_running());

        assert!(registry.detach("sb-1").await.is_some());
        assert!(registry.get("sb-1").await.is_none());
        assert!(registry.detach("sb-1").await.is_none());
    }

    #[tokio::test]
    async fn test_reattach_replaces() {
        let registry = SessionRegistry::new();
        registry.attach(SandboxSession::new("sb", "/w/one")).await;
        let previous = registry.attach(SandboxSession::new("sb", "/w/two")).await;
        assert_eq!(previous.unwrap().workspace_root, "/w/one");
        assert_eq!(registry.get("sb").await.unwrap().workspace_root, "/w/two");
    }

    #[tokio::test]
    async fn test_set_status_and_list() {
        let registry = SessionRegistry::new();
        registry.attach(SandboxSession::new("b", "/w/b")).await;
        registry.attach(SandboxSession::new("a", "/w/a")).await;
        assert!(registry.set_status("b", SessionStatus::Error).await);
        assert!(!registry.set_status("zzz", SessionStatus::Stopped).await);

        let ids: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|s| (s.sandbox_id, s.status))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("a".to_string(), SessionStatus::Running),
                ("b".to_string(), SessionStatus::Error)
            ]
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Stopped.to_string(), "stopped");
    }
}
