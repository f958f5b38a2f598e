//! Engine configuration.
//!
//! Loaded from TOML (every section optional) and then adjusted by
//! `WARDEN_*` environment variables. Call [`WardenConfig::validate`] before
//! wiring components; the constructors assume a validated config.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value}")]
    Env { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command execution gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout applied when the caller does not pass one (milliseconds).
    pub default_timeout_ms: u64,
    /// Stdout/stderr are truncated to this many bytes each.
    pub max_output_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Additions to the built-in guard policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    /// Extra regular expressions matched against joined command text.
    pub denied_command_patterns: Vec<String>,
    /// Extra absolute prefixes no path may fall under.
    pub forbidden_path_prefixes: Vec<String>,
}

/// Restart circuit breaker limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub cooldown_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// How the long-lived development server is launched and discovered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevServerConfig {
    /// argv of the server process, run from the workspace root.
    pub start_command: Vec<String>,
    /// `pgrep -f` pattern identifying the server process.
    pub process_pattern: String,
    /// Log file, relative to the workspace root.
    pub log_path: String,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Regexes scanned against recent log output. The first capture group is
    /// either a full URL or a bare port number.
    pub ready_patterns: Vec<String>,
    /// Ports probed when the log yields nothing.
    pub candidate_ports: Vec<u16>,
    /// Host used when building the reachable URL.
    pub public_host: String,
    /// Lines of log read when scanning for ready patterns.
    pub log_scan_lines: usize,
    pub restart: RestartPolicy,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            start_command: vec!["npm".into(), "run".into(), "dev".into()],
            process_pattern: "npm run dev|vite|next dev|react-scripts start".into(),
            log_path: ".warden/dev-server.log".into(),
            startup_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            ready_patterns: vec![
                r"Local:\s+(https?://\S+)".into(),
                r"url:\s*(https?://\S+)".into(),
                r"(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):\d+)".into(),
                r"(?i)listening on (?:port )?:?(\d{2,5})".into(),
                r"(?i)running (?:at|on) (?:port )?:?(\d{2,5})".into(),
            ],
            candidate_ports: vec![3000, 5173, 8080, 4200, 8000, 5000],
            public_host: "localhost".into(),
            log_scan_lines: 50,
            restart: RestartPolicy::default(),
        }
    }
}

/// Agent decision loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_retries: u32,
    pub success_markers: Vec<String>,
    pub failure_markers: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            success_markers: vec![
                "success".into(),
                "successfully".into(),
                "created".into(),
                "updated".into(),
                "completed".into(),
                "done".into(),
                "ok".into(),
                "compiled".into(),
                "ready".into(),
            ],
            failure_markers: vec![
                "error".into(),
                "failed".into(),
                "failure".into(),
                "exception".into(),
                "cannot".into(),
                "not found".into(),
                "denied".into(),
                "traceback".into(),
            ],
        }
    }
}

/// Which sandbox runtime the CLI talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub docker_bin: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenConfig {
    pub gateway: GatewayConfig,
    pub guard: GuardConfig,
    pub dev_server: DevServerConfig,
    pub agent: AgentConfig,
    pub runtime: RuntimeConfig,
}

impl WardenConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load `path` if given, else defaults, then apply env overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WARDEN_*` overrides. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WARDEN_EXEC_TIMEOUT_MS") {
            self.gateway.default_timeout_ms = parse_env("WARDEN_EXEC_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WARDEN_MAX_RETRIES") {
            self.agent.max_retries = parse_env("WARDEN_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("WARDEN_MAX_RESTARTS") {
            self.dev_server.restart.max_restarts = parse_env("WARDEN_MAX_RESTARTS", &v)?;
        }
        if let Some(v) = lookup("WARDEN_RESTART_COOLDOWN_MS") {
            self.dev_server.restart.cooldown_ms = parse_env("WARDEN_RESTART_COOLDOWN_MS", &v)?;
        }
        if let Some(v) = lookup("WARDEN_DOCKER_BIN") {
            self.runtime.docker_bin = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "gateway.default_timeout_ms must be > 0".into(),
            ));
        }
        let dev = &self.dev_server;
        if dev.start_command.is_empty() {
            return Err(ConfigError::Invalid(
                "dev_server.start_command must not be empty".into(),
            ));
        }
        if dev.process_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dev_server.process_pattern must not be empty".into(),
            ));
        }
        if dev.poll_interval_ms == 0 || dev.startup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dev_server poll interval and startup timeout must be > 0".into(),
            ));
        }
        if dev.candidate_ports.is_empty() {
            return Err(ConfigError::Invalid(
                "dev_server.candidate_ports must not be empty".into(),
            ));
        }
        for pattern in dev
            .ready_patterns
            .iter()
            .chain(self.guard.denied_command_patterns.iter())
        {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("bad pattern {pattern:?}: {e}")))?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
