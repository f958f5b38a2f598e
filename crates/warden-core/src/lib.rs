//! Warden Core Library
//!
//! Sandboxed tool execution for coding agents: a guard and command gateway
//! in front of the sandbox, a dev-server lifecycle controller with a
//! restart circuit breaker, a validated tool dispatcher, and the bounded
//! agent decision loop that drives them.

pub mod agent;
pub mod config;
pub mod error;
pub mod fakes;
pub mod gateway;
pub mod guard;
pub mod lifecycle;
pub mod obs;
pub mod runtime;
pub mod session;
pub mod telemetry;
pub mod tools;

pub use agent::{
    parse_decision, AgentLoop, CompletionStrategy, DecideError, Decider, Decision,
    DecisionContext, DecisionRecord, LoopConfig, LoopOutcome, LoopState, MarkerHeuristic,
    ReplayDecider, Responder, SummaryResponder, ToolCall,
};
pub use config::{ConfigError, WardenConfig};
pub use error::{WardenError, WardenResult};
pub use gateway::{CommandGateway, ExecutionRequest, ExecutionResult};
pub use guard::{is_safe_command, is_safe_path, GuardPolicy, GuardViolation};
pub use lifecycle::{LifecycleController, ServerState, ServerStatus};
pub use runtime::{DockerRuntime, RawOutput, RuntimeError, SandboxRuntime};
pub use session::{SandboxSession, SessionRegistry, SessionStatus};
pub use tools::{
    register_builtin_tools, ExecutionContext, ToolCategory, ToolDefinition, ToolDispatcher,
    ToolHandler, ToolResult,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
