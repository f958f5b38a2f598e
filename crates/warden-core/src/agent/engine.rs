//! The bounded decision loop.
//!
//! Each iteration asks the decider what to do. `continue_tools` runs the
//! named tools through the dispatcher and checks successful output with the
//! completion strategy; `respond_to_user` and `need_input` end the loop.
//! Every iteration that does not end the loop spends one retry, so the loop
//! runs at most `max_retries` iterations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use super::completion::{CompletionStrategy, Verdict};
use super::decision::{
    DecideError, Decider, Decision, DecisionContext, DecisionRecord, Responder, ResponseContext,
    SandboxSnapshot, ToolCall,
};
use crate::config::AgentConfig;
use crate::error::WardenError;
use crate::lifecycle::LifecycleController;
use crate::obs;
use crate::tools::{ExecutionContext, ToolCategory, ToolDispatcher, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Analyzing,
    Done,
    AwaitingUser,
    Failed,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Analyzing => "analyzing",
            LoopState::Done => "done",
            LoopState::AwaitingUser => "awaiting_user",
            LoopState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_retries: u32,
    /// Only tools in these categories are offered and callable.
    pub categories: Option<Vec<ToolCategory>>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            categories: None,
        }
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            categories: None,
        }
    }
}

/// One tool call made by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub iteration: u32,
    pub tool_id: String,
    pub params: Value,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<WardenError>,
    pub execution_time_ms: u64,
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub success: bool,
    pub needs_user_input: bool,
    pub message: String,
    /// Iterations run, including the final one.
    pub attempts: u32,
    pub decisions: Vec<DecisionRecord>,
    pub invocations: Vec<InvocationRecord>,
}

/// What one `continue_tools` iteration produced.
enum Step {
    Completed(String),
    Retry(Option<String>),
}

pub struct AgentLoop {
    dispatcher: Arc<ToolDispatcher>,
    decider: Arc<dyn Decider>,
    responder: Arc<dyn Responder>,
    completion: Arc<dyn CompletionStrategy>,
    lifecycle: Option<Arc<LifecycleController>>,
    config: LoopConfig,
}

impl AgentLoop {
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        decider: Arc<dyn Decider>,
        responder: Arc<dyn Responder>,
        completion: Arc<dyn CompletionStrategy>,
        config: LoopConfig,
    ) -> Self {
        Self {
            dispatcher,
            decider,
            responder,
            completion,
            lifecycle: None,
            config,
        }
    }

    /// Include the dev-server state in each sandbox snapshot.
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleController>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive `user_request` to an outcome. Never returns an error: every
    /// failure ends up in [`LoopOutcome::message`].
    pub async fn run(&self, user_request: &str, ctx: &ExecutionContext) -> LoopOutcome {
        let span = obs::loop_span(&ctx.request_id);
        let outcome = self.drive(user_request, ctx).instrument(span.clone()).await;
        let _entered = span.enter();
        obs::emit_agent_finished(outcome.state.as_str(), outcome.attempts, outcome.success);
        outcome
    }

    async fn drive(&self, user_request: &str, ctx: &ExecutionContext) -> LoopOutcome {
        let mut run = RunLog::default();
        let mut retry_count = 0u32;
        let mut last_error: Option<String> = None;

        while retry_count < self.config.max_retries {
            let sandbox = self.snapshot(ctx).await;
            let decision_ctx = DecisionContext {
                user_request: user_request.to_string(),
                retry_count,
                last_error: last_error.clone(),
                sandbox: sandbox.clone(),
                available_tools: self.dispatcher.schemas(self.config.categories.as_deref()).await,
                history: run.invocations.clone(),
            };

            let mut record = match self.decider.decide(&decision_ctx).await {
                Ok(record) => record,
                Err(DecideError::Parsing(reason)) => {
                    warn!(%reason, "decision unparseable, answering the user instead");
                    DecisionRecord::respond(format!("I could not settle on a next step ({reason})."))
                        .with_confidence(0.0)
                }
                Err(DecideError::Unavailable(reason)) => {
                    warn!(%reason, "decide capability unavailable");
                    last_error = Some(reason);
                    retry_count += 1;
                    continue;
                }
            };
            record.retry_count = retry_count;
            record.last_error = last_error.clone();
            obs::emit_agent_iteration(retry_count, record.decision.as_str(), record.confidence);
            run.decisions.push(record.clone());
            let attempts = retry_count + 1;

            match record.decision {
                Decision::NeedInput => {
                    return run.finish(LoopState::AwaitingUser, false, true, record.reasoning, attempts);
                }
                Decision::RespondToUser => {
                    let response_ctx = ResponseContext {
                        user_request: user_request.to_string(),
                        reasoning: record.reasoning.clone(),
                        sandbox,
                        invocations: run.invocations.clone(),
                    };
                    return match self.responder.respond(&response_ctx).await {
                        Ok(text) => run.finish(LoopState::Done, true, false, text, attempts),
                        Err(err) => run.finish(
                            LoopState::Failed,
                            false,
                            false,
                            format!("Could not produce a response: {err}"),
                            attempts,
                        ),
                    };
                }
                Decision::ContinueTools => {
                    match self.run_tools(&record.tool_calls, retry_count, ctx, &mut run).await {
                        Step::Completed(message) => {
                            return run.finish(LoopState::Done, true, false, message, attempts);
                        }
                        Step::Retry(error) => {
                            last_error = error;
                            retry_count += 1;
                        }
                    }
                }
            }
        }

        let message = format!(
            "Stopped after {} attempts without completing the task. Last error: {}",
            retry_count,
            last_error.as_deref().unwrap_or("none")
        );
        run.finish(LoopState::Failed, false, false, message, retry_count)
    }

    async fn run_tools(
        &self,
        calls: &[ToolCall],
        iteration: u32,
        ctx: &ExecutionContext,
        run: &mut RunLog,
    ) -> Step {
        if calls.is_empty() {
            return Step::Retry(Some("decision asked for tools but named none".to_string()));
        }

        for call in calls {
            let result = if self.exposed(&call.tool_id).await {
                self.dispatcher
                    .execute(&call.tool_id, call.params.clone(), ctx)
                    .await
            } else {
                ToolResult::err(
                    WardenError::ToolNotFound {
                        tool_id: call.tool_id.clone(),
                    },
                    0,
                )
            };

            run.invocations.push(InvocationRecord {
                iteration,
                tool_id: call.tool_id.clone(),
                params: call.params.clone(),
                success: result.success,
                data: result.data.clone(),
                error: result.error.clone(),
                execution_time_ms: result.execution_time_ms,
            });

            if !result.success {
                let err = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown failure".to_string());
                return Step::Retry(Some(format!("{}: {err}", call.tool_id)));
            }

            let data = result.data.unwrap_or(Value::Null);
            match self.completion.evaluate(&data) {
                Verdict::Complete => {
                    return Step::Completed(format!(
                        "Task completed: {} reported success.",
                        call.tool_id
                    ));
                }
                Verdict::Failed => {
                    return Step::Retry(Some(format!(
                        "{}: output reports a failure",
                        call.tool_id
                    )));
                }
                Verdict::Inconclusive => {
                    debug!(tool_id = %call.tool_id, "tool output inconclusive");
                }
            }
        }
        Step::Retry(None)
    }

    async fn exposed(&self, tool_id: &str) -> bool {
        match &self.config.categories {
            None => true,
            Some(categories) => self
                .dispatcher
                .get(tool_id)
                .await
                .map_or(true, |t| categories.contains(&t.metadata.category)),
        }
    }

    async fn snapshot(&self, ctx: &ExecutionContext) -> Option<SandboxSnapshot> {
        let session = ctx.session.as_ref()?;
        let dev_server = match &self.lifecycle {
            Some(lifecycle) => Some(lifecycle.state(&session.sandbox_id).await),
            None => None,
        };
        Some(SandboxSnapshot {
            sandbox_id: session.sandbox_id.clone(),
            workspace_root: session.workspace_root.clone(),
            dev_server,
        })
    }
}

#[derive(Default)]
struct RunLog {
    decisions: Vec<DecisionRecord>,
    invocations: Vec<InvocationRecord>,
}

impl RunLog {
    fn finish(
        self,
        state: LoopState,
        success: bool,
        needs_user_input: bool,
        message: String,
        attempts: u32,
    ) -> LoopOutcome {
        LoopOutcome {
            state,
            success,
            needs_user_input,
            message,
            attempts,
            decisions: self.decisions,
            invocations: self.invocations,
        }
    }
}
