//! Warden - sandboxed tool execution CLI
//!
//! The `warden` command exposes the guard, gateway, tool dispatcher,
//! dev-server lifecycle and agent loop against a running container.
//!
//! ## Commands
//!
//! - `check-path` / `check-command`: run the guard without executing anything
//! - `exec`: run a guarded command in a sandbox
//! - `tools` / `call`: list and invoke registered tools
//! - `dev-server`: start, stop, restart and inspect the dev server
//! - `replay`: drive the agent loop with decisions from a file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};

use warden_core::agent::{DecideError, DecisionRecord};
use warden_core::telemetry::init_tracing;
use warden_core::tools::PRIVILEGED_PERMISSION;
use warden_core::{
    parse_decision, register_builtin_tools, AgentLoop, CommandGateway, DockerRuntime,
    ExecutionContext, GuardPolicy, LifecycleController, LoopConfig, MarkerHeuristic,
    ReplayDecider, SandboxSession, SummaryResponder, ToolCategory, ToolDispatcher, WardenConfig,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Guarded tool execution inside agent sandboxes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which sandbox to act on.
#[derive(Args, Clone)]
struct SandboxArgs {
    /// Container id or name
    #[arg(long, env = "WARDEN_SANDBOX")]
    sandbox: String,

    /// Workspace root inside the container
    #[arg(long, env = "WARDEN_WORKSPACE_ROOT", default_value = "/workspace")]
    root: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a path is allowed under a workspace root
    CheckPath {
        path: String,

        #[arg(long, default_value = "/workspace")]
        root: String,
    },

    /// Check whether a command (argv) passes the guard
    CheckCommand {
        /// Workspace the command would run against
        #[arg(long)]
        root: Option<String>,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Run a guarded command in the sandbox
    Exec {
        #[command(flatten)]
        target: SandboxArgs,

        /// Working directory relative to the workspace root
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in milliseconds (default from config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// List registered tools
    Tools {
        /// Only tools in these categories (workspace, process, diagnostics)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Print function-calling JSON schemas
        #[arg(long)]
        schema: bool,
    },

    /// Invoke a tool by id
    Call {
        tool: String,

        #[command(flatten)]
        target: SandboxArgs,

        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Caller identity used for auth and rate limiting
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Grant the privileged tool permission
        #[arg(long)]
        privileged: bool,
    },

    /// Manage the dev server
    DevServer {
        #[command(subcommand)]
        action: DevServerAction,
    },

    /// Drive the agent loop with decisions read from a JSON file
    Replay {
        #[command(flatten)]
        target: SandboxArgs,

        /// JSON array of decision objects or raw decision texts
        #[arg(long)]
        decisions: PathBuf,

        /// The user request the loop works on
        #[arg(long)]
        request: String,

        /// Override agent.max_retries
        #[arg(long)]
        max_retries: Option<u32>,

        /// Only expose tools in these categories
        #[arg(long = "category")]
        categories: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DevServerAction {
    Start {
        #[command(flatten)]
        target: SandboxArgs,
    },
    Stop {
        #[command(flatten)]
        target: SandboxArgs,
    },
    Restart {
        #[command(flatten)]
        target: SandboxArgs,

        #[arg(long)]
        reason: Option<String>,
    },
    Status {
        #[command(flatten)]
        target: SandboxArgs,
    },
    Logs {
        #[command(flatten)]
        target: SandboxArgs,

        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Components wired from configuration.
struct Engine {
    config: WardenConfig,
    gateway: Arc<CommandGateway>,
    lifecycle: Arc<LifecycleController>,
    dispatcher: Arc<ToolDispatcher>,
}

impl Engine {
    async fn build(config: WardenConfig) -> Result<Self> {
        let guard = GuardPolicy::from_config(&config.guard).context("Invalid guard pattern")?;
        let runtime = Arc::new(DockerRuntime::new(config.runtime.docker_bin.clone()));
        let gateway = Arc::new(CommandGateway::new(runtime, guard, config.gateway.clone()));
        let lifecycle = Arc::new(
            LifecycleController::new(gateway.clone(), config.dev_server.clone())
                .context("Invalid dev_server.ready_patterns")?,
        );
        let dispatcher = Arc::new(ToolDispatcher::new());
        register_builtin_tools(&dispatcher, gateway.clone(), lifecycle.clone()).await;
        Ok(Self {
            config,
            gateway,
            lifecycle,
            dispatcher,
        })
    }
}

fn session(target: &SandboxArgs) -> SandboxSession {
    SandboxSession::new(target.sandbox.clone(), target.root.clone())
}

fn parse_categories(names: &[String]) -> Option<Vec<ToolCategory>> {
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .iter()
            .filter_map(|n| n.parse::<ToolCategory>().ok())
            .collect(),
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = WardenConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::CheckPath { path, root } => cmd_check_path(&config, &path, &root),
        Commands::CheckCommand { root, argv } => {
            cmd_check_command(&config, &argv, root.as_deref())
        }
        Commands::Exec {
            target,
            cwd,
            timeout_ms,
            argv,
        } => {
            let engine = Engine::build(config).await?;
            cmd_exec(&engine, &target, argv, cwd.as_deref(), timeout_ms).await
        }
        Commands::Tools { categories, schema } => {
            let engine = Engine::build(config).await?;
            cmd_tools(&engine, &categories, schema).await
        }
        Commands::Call {
            tool,
            target,
            params,
            caller,
            privileged,
        } => {
            let engine = Engine::build(config).await?;
            cmd_call(&engine, &tool, &target, &params, &caller, privileged).await
        }
        Commands::DevServer { action } => {
            let engine = Engine::build(config).await?;
            cmd_dev_server(&engine, action).await
        }
        Commands::Replay {
            target,
            decisions,
            request,
            max_retries,
            categories,
        } => {
            let engine = Engine::build(config).await?;
            cmd_replay(&engine, &target, &decisions, &request, max_retries, &categories).await
        }
    }
}

fn cmd_check_path(config: &WardenConfig, path: &str, root: &str) -> Result<()> {
    let guard = GuardPolicy::from_config(&config.guard).context("Invalid guard pattern")?;
    match guard.check_path(path, root) {
        Ok(resolved) => {
            println!("allowed: {}", resolved.display());
            Ok(())
        }
        Err(violation) => anyhow::bail!("denied: {violation}"),
    }
}

fn cmd_check_command(config: &WardenConfig, argv: &[String], root: Option<&str>) -> Result<()> {
    let guard = GuardPolicy::from_config(&config.guard).context("Invalid guard pattern")?;
    let verdict = match root {
        Some(root) => guard.check_command_in(argv, root),
        None => guard.check_command(argv),
    };
    match verdict {
        Ok(()) => {
            println!("allowed");
            Ok(())
        }
        Err(violation) => anyhow::bail!("denied: {violation}"),
    }
}

async fn cmd_exec(
    engine: &Engine,
    target: &SandboxArgs,
    argv: Vec<String>,
    cwd: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let session = session(target);
    let result = engine.gateway.run(&session, argv, cwd, timeout_ms).await;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    info!(
        exit_code = ?result.exit_code,
        duration_ms = result.duration_ms,
        "command finished"
    );
    match result.error_message() {
        None => Ok(()),
        Some(message) => anyhow::bail!(message),
    }
}

async fn cmd_tools(engine: &Engine, categories: &[String], schema: bool) -> Result<()> {
    let filter = parse_categories(categories);
    if schema {
        return print_json(&engine.dispatcher.function_schemas(filter.as_deref()).await);
    }
    for tool in engine.dispatcher.list(filter.as_deref()).await {
        println!(
            "{:<20} {:<12} {:<14} {}",
            tool.id,
            tool.metadata.category.to_string(),
            format!("{:?}", tool.metadata.access_level).to_lowercase(),
            tool.schema.description
        );
    }
    Ok(())
}

async fn cmd_call(
    engine: &Engine,
    tool: &str,
    target: &SandboxArgs,
    params: &str,
    caller: &str,
    privileged: bool,
) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let mut ctx = ExecutionContext::authenticated(caller).with_session(session(target));
    if privileged {
        ctx = ctx.with_permission(PRIVILEGED_PERMISSION);
    }

    let result = engine.dispatcher.execute(tool, params, &ctx).await;
    print_json(&result)?;
    if !result.success {
        anyhow::bail!("tool {tool} failed");
    }
    Ok(())
}

async fn cmd_dev_server(engine: &Engine, action: DevServerAction) -> Result<()> {
    let ctl = &engine.lifecycle;
    match action {
        DevServerAction::Start { target } => {
            let status = ctl.start(&session(&target)).await?;
            print_json(&status)
        }
        DevServerAction::Stop { target } => {
            ctl.stop(&session(&target)).await?;
            println!("stopped");
            Ok(())
        }
        DevServerAction::Restart { target, reason } => {
            let status = ctl.restart(&session(&target), reason.as_deref()).await?;
            print_json(&status)
        }
        DevServerAction::Status { target } => {
            let status = ctl.check_status(&session(&target)).await?;
            print_json(&status)
        }
        DevServerAction::Logs { target, lines } => {
            print!("{}", ctl.logs(&session(&target), lines).await?);
            Ok(())
        }
    }
}

async fn cmd_replay(
    engine: &Engine,
    target: &SandboxArgs,
    decisions_path: &Path,
    request: &str,
    max_retries: Option<u32>,
    categories: &[String],
) -> Result<()> {
    let decisions = load_decisions(decisions_path)?;
    info!(count = decisions.len(), "replaying decisions");

    let mut loop_config = LoopConfig::from(&engine.config.agent);
    if let Some(n) = max_retries {
        loop_config.max_retries = n;
    }
    loop_config.categories = parse_categories(categories);

    let completion = MarkerHeuristic::from_config(&engine.config.agent)
        .context("Invalid agent completion markers")?;
    let agent = AgentLoop::new(
        engine.dispatcher.clone(),
        Arc::new(ReplayDecider::from_results(decisions)),
        Arc::new(SummaryResponder),
        Arc::new(completion),
        loop_config,
    )
    .with_lifecycle(engine.lifecycle.clone());

    let ctx = ExecutionContext::authenticated("replay").with_session(session(target));
    let outcome = agent.run(request, &ctx).await;
    print_json(&outcome)?;
    if !outcome.success && !outcome.needs_user_input {
        anyhow::bail!("{}", outcome.message);
    }
    Ok(())
}

/// Read a JSON array whose items are decision objects or raw decision
/// texts (as a model would emit them).
fn load_decisions(path: &Path) -> Result<Vec<Result<DecisionRecord, DecideError>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read decisions file: {:?}", path))?;
    let items: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Decisions file is not a JSON array: {:?}", path))?;
    if items.is_empty() {
        anyhow::bail!("Decisions file is empty: {:?}", path);
    }
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(text) => parse_decision(&text),
            other => serde_json::from_value(other).map_err(|e| DecideError::Parsing(e.to_string())),
        })
        .collect())
}
