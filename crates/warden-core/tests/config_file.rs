//! Integration tests for loading configuration from disk.

use std::io::Write;
use std::sync::Arc;

use warden_core::config::{ConfigError, WardenConfig};
use warden_core::fakes::ScriptedRuntime;
use warden_core::{CommandGateway, GuardPolicy, LifecycleController};

#[test]
fn partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[gateway]
default_timeout_ms = 2500

[dev_server]
start_command = ["pnpm", "dev"]
candidate_ports = [5173]

[dev_server.restart]
max_restarts = 5
"#
    )
    .unwrap();

    let config = WardenConfig::from_toml_file(file.path()).unwrap();
    assert_eq!(config.gateway.default_timeout_ms, 2500);
    assert_eq!(config.dev_server.start_command, vec!["pnpm", "dev"]);
    assert_eq!(config.dev_server.restart.max_restarts, 5);
    assert_eq!(config.dev_server.restart.cooldown_ms, 30_000);
    assert_eq!(config.agent.max_retries, 3);
    config.validate().unwrap();
}

#[test]
fn invalid_values_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[dev_server]\ncandidate_ports = []").unwrap();
    let config = WardenConfig::from_toml_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[gateway]\ndefault_timeout_ms = \"soon\"").unwrap();
    assert!(matches!(
        WardenConfig::from_toml_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = WardenConfig::from_toml_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[tokio::test]
async fn configured_guard_and_lifecycle_build() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[guard]
denied_command_patterns = ["\\bgit\\s+push\\b"]
forbidden_path_prefixes = ["/opt/secrets"]

[dev_server]
ready_patterns = ["serving on :(\\d+)"]
"#
    )
    .unwrap();
    let config = WardenConfig::from_toml_file(file.path()).unwrap();
    config.validate().unwrap();

    let guard = GuardPolicy::from_config(&config.guard).unwrap();
    assert!(!guard.is_safe_command(&["git", "push", "origin", "main"]));
    assert!(!guard.is_safe_command(&["cat", "/opt/secrets/key"]));
    assert!(guard.is_safe_command(&["git", "status"]));

    let gateway = Arc::new(CommandGateway::new(
        Arc::new(ScriptedRuntime::new()),
        guard,
        config.gateway.clone(),
    ));
    assert!(LifecycleController::new(gateway, config.dev_server.clone()).is_ok());
}
