//! Tool dispatcher: the single entry point for invoking tools by id.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::context::ExecutionContext;
use super::definition::{AccessLevel, ToolCategory, ToolDefinition, ToolSchema, PRIVILEGED_PERMISSION};
use super::rate_limit::RateLimiter;
use super::stats::{StatsTable, ToolStats};
use crate::error::WardenError;
use crate::obs;

/// Outcome of one dispatch. Failures are values, never panics or `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<WardenError>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
        }
    }

    pub fn err(error: WardenError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            execution_time_ms,
        }
    }
}

/// Catalog of tools plus the checks every call goes through.
///
/// Pipeline per call: lookup, parameter contract, custom validator,
/// access level, rate limit, handler (under the tool's timeout), stats.
#[derive(Default)]
pub struct ToolDispatcher {
    tools: RwLock<HashMap<String, ToolDefinition>>,
    limiter: RateLimiter,
    stats: StatsTable,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing and returning any tool with the same id.
    pub async fn register(&self, tool: ToolDefinition) -> Option<ToolDefinition> {
        let id = tool.id.clone();
        let category = tool.metadata.category.clone();
        let previous = self.tools.write().await.insert(id.clone(), tool);
        if previous.is_some() {
            self.limiter.forget_tool(&id).await;
        }
        info!(tool_id = %id, %category, replaced = previous.is_some(), "registered tool");
        previous
    }

    pub async fn unregister(&self, id: &str) -> Option<ToolDefinition> {
        let removed = self.tools.write().await.remove(id);
        if removed.is_some() {
            self.limiter.forget_tool(id).await;
            info!(tool_id = %id, "unregistered tool");
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<ToolDefinition> {
        self.tools.read().await.get(id).cloned()
    }

    /// Registered tools sorted by id, optionally limited to `categories`.
    pub async fn list(&self, categories: Option<&[ToolCategory]>) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .filter(|t| categories.map_or(true, |cats| cats.contains(&t.metadata.category)))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    pub async fn schemas(&self, categories: Option<&[ToolCategory]>) -> Vec<ToolSchema> {
        self.list(categories)
            .await
            .into_iter()
            .map(|t| t.schema)
            .collect()
    }

    /// Function-calling JSON for the selected tools.
    pub async fn function_schemas(&self, categories: Option<&[ToolCategory]>) -> Vec<Value> {
        self.schemas(categories)
            .await
            .iter()
            .map(ToolSchema::to_function_json)
            .collect()
    }

    pub async fn stats(&self, id: &str) -> Option<ToolStats> {
        self.stats.get(id).await
    }

    pub async fn all_stats(&self) -> BTreeMap<String, ToolStats> {
        self.stats.snapshot().await
    }

    /// Run tool `id` with `params` on behalf of `ctx`.
    pub async fn execute(&self, id: &str, params: Value, ctx: &ExecutionContext) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.get(id).await else {
            let err = WardenError::ToolNotFound {
                tool_id: id.to_string(),
            };
            obs::emit_tool_rejected(id, &ctx.request_id, &err);
            return ToolResult::err(err, 0);
        };

        if let Err(err) = self.admit(&tool, &params, ctx).await {
            obs::emit_tool_rejected(id, &ctx.request_id, &err);
            let elapsed_ms = elapsed_ms(started);
            self.stats.record(id, false, elapsed_ms).await;
            return ToolResult::err(err, elapsed_ms);
        }

        debug!(tool_id = %id, request_id = %ctx.request_id, "invoking tool handler");
        let outcome = invoke(&tool, params, ctx).await;
        let elapsed_ms = elapsed_ms(started);
        let success = outcome.is_ok();
        self.stats.record(id, success, elapsed_ms).await;
        obs::emit_tool_dispatched(id, &ctx.request_id, success, elapsed_ms);

        match outcome {
            Ok(data) => ToolResult::ok(data, elapsed_ms),
            Err(err) => ToolResult::err(err, elapsed_ms),
        }
    }

    async fn admit(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        ctx: &ExecutionContext,
    ) -> Result<(), WardenError> {
        tool.schema
            .parameters
            .validate(params)
            .map_err(WardenError::validation)?;

        if let Some(validator) = &tool.validator {
            let outcome = validator.validate(params);
            if !outcome.is_valid {
                return Err(WardenError::validation(
                    outcome
                        .reason
                        .unwrap_or_else(|| "parameters rejected".to_string()),
                ));
            }
        }

        match tool.metadata.access_level {
            AccessLevel::Public => {}
            AccessLevel::Authenticated if !ctx.authenticated => {
                return Err(WardenError::AuthRequired {
                    reason: format!("tool {} requires an authenticated caller", tool.id),
                });
            }
            AccessLevel::Authenticated => {}
            AccessLevel::Privileged => {
                if !ctx.authenticated || !ctx.has_permission(PRIVILEGED_PERMISSION) {
                    return Err(WardenError::AuthRequired {
                        reason: format!(
                            "tool {} requires the {PRIVILEGED_PERMISSION} permission",
                            tool.id
                        ),
                    });
                }
            }
        }

        if let Some(limit) = tool.metadata.rate_limit {
            self.limiter
                .check(&tool.id, &ctx.caller, limit, Instant::now())
                .await?;
        }
        Ok(())
    }
}

/// Call the handler, turning timeouts and panics into errors.
async fn invoke(tool: &ToolDefinition, params: Value, ctx: &ExecutionContext) -> Result<Value, WardenError> {
    let call = AssertUnwindSafe(tool.handler.handle(params, ctx)).catch_unwind();
    let joined = match tool.metadata.timeout_ms {
        Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), call)
            .await
            .map_err(|_| WardenError::ExecutionTimeout { timeout_ms })?,
        None => call.await,
    };
    joined.unwrap_or_else(|_| Err(WardenError::failed(format!("tool {} panicked", tool.id))))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
