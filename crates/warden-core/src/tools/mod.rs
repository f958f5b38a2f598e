//! Tool registry and dispatcher.
//!
//! - [`definition`]: `ToolDefinition`, schema, parameter contract, metadata
//! - [`context`]: per-call `ExecutionContext`
//! - [`dispatcher`]: `ToolDispatcher` with the validation/auth/rate-limit pipeline
//! - [`builtin`]: workspace, process and diagnostics tools over the gateway

pub mod builtin;
pub mod context;
pub mod definition;
pub mod dispatcher;
pub mod rate_limit;
pub mod stats;

pub use builtin::register_builtin_tools;
pub use context::ExecutionContext;
pub use definition::{
    decode_params, AccessLevel, ParamField, ParamKind, ParamValidator, ParameterSpec, RateLimit,
    ToolCategory, ToolDefinition, ToolHandler, ToolMetadata, ToolSchema, ValidationOutcome,
    PRIVILEGED_PERMISSION,
};
pub use dispatcher::{ToolDispatcher, ToolResult};
pub use stats::ToolStats;
