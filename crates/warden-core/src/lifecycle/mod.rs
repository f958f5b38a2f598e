//! Dev-server lifecycle inside a sandbox.
//!
//! Per sandbox: `stopped -> starting -> running -> (error | stopped)`.
//! Restarts are gated by a [`RestartGovernor`] so an agent looping on a
//! broken process produces a bounded, visible failure instead of a restart
//! storm.
//!
//! - [`governor`]: `RestartGovernor` circuit breaker
//! - [`discovery`]: log scanning and port probing for the reachable URL

pub mod discovery;
pub mod governor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::DevServerConfig;
use crate::error::{WardenError, WardenResult};
use crate::gateway::{CommandGateway, ExecutionRequest};
use crate::obs;
use crate::session::SandboxSession;

pub use discovery::{Endpoint, UrlDiscovery};
pub use governor::{GovernorSnapshot, RestartGovernor};

/// Backgrounds `$@` with output appended to the log at `$1`.
const LAUNCH_SCRIPT: &str = r#"log="$1"; shift; nohup "$@" > "$log" 2>&1 &"#;

/// Probes allowed for the old process to exit after a polite kill.
const STOP_POLLS: u32 = 5;

/// Where a sandbox's dev server is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Error => write!(f, "error"),
        }
    }
}

/// Result of a status probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub url: Option<String>,
}

/// Starts, stops and restarts one long-lived process per sandbox.
pub struct LifecycleController {
    gateway: Arc<CommandGateway>,
    config: DevServerConfig,
    discovery: UrlDiscovery,
    governors: Mutex<HashMap<String, RestartGovernor>>,
    states: Mutex<HashMap<String, ServerState>>,
}

impl LifecycleController {
    pub fn new(gateway: Arc<CommandGateway>, config: DevServerConfig) -> Result<Self, regex::Error> {
        let discovery = UrlDiscovery::from_config(&config)?;
        Ok(Self {
            gateway,
            config,
            discovery,
            governors: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    pub async fn state(&self, sandbox_id: &str) -> ServerState {
        self.states
            .lock()
            .await
            .get(sandbox_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn governor_snapshot(&self, sandbox_id: &str) -> GovernorSnapshot {
        let now = Instant::now();
        let governors = self.governors.lock().await;
        match governors.get(sandbox_id) {
            Some(g) => g.snapshot(now),
            None => RestartGovernor::new(self.config.restart).snapshot(now),
        }
    }

    /// Start the server unless it is already running.
    #[instrument(skip(self, session), fields(sandbox_id = %session.sandbox_id))]
    pub async fn start(&self, session: &SandboxSession) -> WardenResult<ServerStatus> {
        let status = self.check_status(session).await?;
        if status.is_running {
            debug!("dev server already running");
            return Ok(status);
        }
        self.launch_and_wait(session).await
    }

    /// Kill the server and reset the restart governor.
    #[instrument(skip(self, session), fields(sandbox_id = %session.sandbox_id))]
    pub async fn stop(&self, session: &SandboxSession) -> WardenResult<()> {
        match self.terminate(session).await {
            Ok(()) => {
                if let Some(g) = self.governors.lock().await.get_mut(&session.sandbox_id) {
                    g.reset();
                }
                self.set_state(&session.sandbox_id, ServerState::Stopped).await;
                info!("dev server stopped");
                Ok(())
            }
            Err(err) => {
                self.set_state(&session.sandbox_id, ServerState::Error).await;
                Err(err)
            }
        }
    }

    /// Stop then start, subject to the restart governor.
    ///
    /// A refused restart touches nothing in the sandbox.
    #[instrument(skip(self, session), fields(sandbox_id = %session.sandbox_id))]
    pub async fn restart(
        &self,
        session: &SandboxSession,
        reason: Option<&str>,
    ) -> WardenResult<ServerStatus> {
        {
            let mut governors = self.governors.lock().await;
            let governor = governors
                .entry(session.sandbox_id.clone())
                .or_insert_with(|| RestartGovernor::new(self.config.restart));
            if let Err(err) = governor.admit(Instant::now()) {
                obs::emit_restart_refused(&session.sandbox_id, &err);
                return Err(err);
            }
            info!(
                reason = reason.unwrap_or("unspecified"),
                restart_count = governor.restart_count(),
                "restarting dev server"
            );
        }

        if let Err(err) = self.terminate(session).await {
            self.set_state(&session.sandbox_id, ServerState::Error).await;
            return Err(err);
        }
        self.launch_and_wait(session).await
    }

    /// Probe for the process and, when present, its reachable URL.
    pub async fn check_status(&self, session: &SandboxSession) -> WardenResult<ServerStatus> {
        let pid = self.probe_process(session).await?;
        let Some(pid) = pid else {
            let mut states = self.states.lock().await;
            if states.get(&session.sandbox_id) == Some(&ServerState::Running) {
                warn!(sandbox_id = %session.sandbox_id, "dev server exited");
                states.insert(session.sandbox_id.clone(), ServerState::Stopped);
            }
            return Ok(ServerStatus::default());
        };

        let endpoint = self.discover(session).await;
        Ok(ServerStatus {
            is_running: true,
            pid: Some(pid),
            port: endpoint.as_ref().and_then(|e| e.port),
            url: endpoint.map(|e| e.url),
        })
    }

    /// Last `lines` lines of the server log.
    pub async fn logs(&self, session: &SandboxSession, lines: usize) -> WardenResult<String> {
        let result = self
            .gateway
            .tail_file(session, &self.config.log_path, lines)
            .await
            .into_result()?;
        Ok(result.stdout)
    }

    async fn launch_and_wait(&self, session: &SandboxSession) -> WardenResult<ServerStatus> {
        let sandbox_id = session.sandbox_id.as_str();
        self.set_state(sandbox_id, ServerState::Starting).await;

        if let Err(err) = self.launch(session).await {
            self.set_state(sandbox_id, ServerState::Error).await;
            return Err(err);
        }

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Duration::from_millis(self.config.startup_timeout_ms);
        let mut waited = Duration::ZERO;
        while waited < deadline {
            tokio::time::sleep(poll).await;
            waited += poll;

            let pid = match self.probe_process(session).await {
                Ok(pid) => pid,
                Err(err) => {
                    self.set_state(sandbox_id, ServerState::Error).await;
                    return Err(err);
                }
            };
            if let Some(pid) = pid {
                let endpoint = self.discover(session).await;
                self.set_state(sandbox_id, ServerState::Running).await;
                obs::emit_devserver_started(
                    sandbox_id,
                    Some(pid),
                    endpoint.as_ref().map(|e| e.url.as_str()),
                );
                return Ok(ServerStatus {
                    is_running: true,
                    pid: Some(pid),
                    port: endpoint.as_ref().and_then(|e| e.port),
                    url: endpoint.map(|e| e.url),
                });
            }
        }

        self.set_state(sandbox_id, ServerState::Error).await;
        warn!(sandbox_id = %sandbox_id, waited_ms = waited.as_millis() as u64, "dev server did not come up");
        Err(WardenError::ExecutionTimeout {
            timeout_ms: self.config.startup_timeout_ms,
        })
    }

    async fn launch(&self, session: &SandboxSession) -> WardenResult<()> {
        let log_abs = self
            .gateway
            .guard()
            .check_path(&self.config.log_path, &session.workspace_root)?;
        if let Some(dir) = log_abs.parent() {
            self.gateway
                .make_dir(session, &dir.display().to_string())
                .await
                .into_result()?;
        }

        let log = log_abs.display().to_string();
        let mut command: Vec<String> = vec![
            "sh".into(),
            "-c".into(),
            LAUNCH_SCRIPT.into(),
            "warden-dev".into(),
            log,
        ];
        command.extend(self.config.start_command.iter().cloned());
        let request = ExecutionRequest::new(
            session.sandbox_id.clone(),
            command,
            session.workspace_root.clone(),
        );
        self.gateway
            .execute(session, &request, None)
            .await
            .into_result()?;
        Ok(())
    }

    /// Kill the process, escalating to SIGKILL if it lingers.
    async fn terminate(&self, session: &SandboxSession) -> WardenResult<()> {
        self.signal(session, None).await?;

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        for _ in 0..STOP_POLLS {
            if self.probe_process(session).await?.is_none() {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }

        warn!(sandbox_id = %session.sandbox_id, "dev server ignored SIGTERM, sending SIGKILL");
        self.signal(session, Some("-KILL")).await?;
        tokio::time::sleep(poll).await;
        match self.probe_process(session).await? {
            None => Ok(()),
            Some(pid) => Err(WardenError::failed(format!(
                "dev server process {pid} did not exit"
            ))),
        }
    }

    async fn signal(&self, session: &SandboxSession, signal: Option<&str>) -> WardenResult<()> {
        let mut command = vec!["pkill".to_string()];
        if let Some(sig) = signal {
            command.push(sig.to_string());
        }
        command.extend(["-f".to_string(), self.config.process_pattern.clone()]);

        let result = self.gateway.run(session, command, None, None).await;
        // pkill exits 1 when nothing matched
        match result.exit_code {
            Some(0) | Some(1) if result.error.as_ref().map_or(true, is_exit_failure) => Ok(()),
            _ => Err(result
                .error
                .unwrap_or_else(|| WardenError::failed("pkill failed"))),
        }
    }

    /// First pid matching the process pattern, if any.
    async fn probe_process(&self, session: &SandboxSession) -> WardenResult<Option<u32>> {
        let command = vec![
            "pgrep".to_string(),
            "-f".to_string(),
            self.config.process_pattern.clone(),
        ];
        let result = self.gateway.run(session, command, None, None).await;
        if result.success {
            return Ok(result
                .stdout
                .lines()
                .find_map(|l| l.trim().parse::<u32>().ok()));
        }
        match (result.exit_code, result.error) {
            (Some(1), Some(WardenError::ExecutionFailed { .. })) => Ok(None),
            (_, Some(err)) => Err(err),
            (_, None) => Ok(None),
        }
    }

    async fn discover(&self, session: &SandboxSession) -> Option<Endpoint> {
        let tail = self
            .gateway
            .tail_file(session, &self.config.log_path, self.config.log_scan_lines)
            .await;
        if tail.success {
            if let Some(endpoint) = self.discovery.scan_log(&tail.stdout) {
                return Some(endpoint);
            }
        }

        let probes = self.config.candidate_ports.iter().map(|port| {
            let command = discovery::probe_command(*port);
            async move {
                let result = self.gateway.run(session, command, None, None).await;
                (*port, result.success && discovery::probe_answered(&result.stdout))
            }
        });
        join_all(probes)
            .await
            .into_iter()
            .find(|(_, answered)| *answered)
            .map(|(port, _)| self.discovery.endpoint_for_port(port))
    }

    async fn set_state(&self, sandbox_id: &str, state: ServerState) {
        self.states.lock().await.insert(sandbox_id.to_string(), state);
    }
}

fn is_exit_failure(err: &WardenError) -> bool {
    matches!(err, WardenError::ExecutionFailed { .. })
}
