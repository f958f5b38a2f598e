//! In-memory fakes (testing only).
//!
//! [`ScriptedRuntime`] stands in for a real sandbox: it records every argv
//! it receives and answers from rules matched by substring against the
//! space-joined command. [`CountingHandler`] is a tool handler that counts
//! invocations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WardenError;
use crate::runtime::{RawOutput, RuntimeError, SandboxRuntime};
use crate::tools::{ExecutionContext, ToolHandler};

/// One command observed by a [`ScriptedRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub sandbox_id: String,
    pub command: Vec<String>,
    pub working_directory: String,
}

impl RecordedCall {
    pub fn joined(&self) -> String {
        self.command.join(" ")
    }
}

type Responder = Box<dyn Fn(&RecordedCall) -> RawOutput + Send + Sync>;

enum Replies {
    Fixed(VecDeque<Result<RawOutput, RuntimeError>>),
    Dynamic(Responder),
}

struct Rule {
    needle: String,
    replies: Replies,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.replies {
            Replies::Fixed(_) => "fixed",
            Replies::Dynamic(_) => "dynamic",
        };
        f.debug_struct("Rule")
            .field("needle", &self.needle)
            .field("replies", &kind)
            .finish()
    }
}

/// Scripted sandbox runtime.
///
/// Rules are consulted in insertion order. A rule with several replies
/// hands them out in order and repeats the last one. Commands matching no
/// rule succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer commands containing `needle` with `output`.
    pub fn on(self, needle: &str, output: RawOutput) -> Self {
        self.on_sequence(needle, vec![output])
    }

    /// Answer successive matching commands with `outputs`, repeating the last.
    pub fn on_sequence(mut self, needle: &str, outputs: Vec<RawOutput>) -> Self {
        self.rules_mut().push(Rule {
            needle: needle.to_string(),
            replies: Replies::Fixed(outputs.into_iter().map(Ok).collect()),
        });
        self
    }

    /// Compute the reply for commands containing `needle` from the call.
    /// Lets a test keep its own state, e.g. whether a process is alive.
    pub fn on_with<F>(mut self, needle: &str, respond: F) -> Self
    where
        F: Fn(&RecordedCall) -> RawOutput + Send + Sync + 'static,
    {
        self.rules_mut().push(Rule {
            needle: needle.to_string(),
            replies: Replies::Dynamic(Box::new(respond)),
        });
        self
    }

    /// Fail commands containing `needle` at the transport level.
    pub fn fail_on(mut self, needle: &str, error: RuntimeError) -> Self {
        self.rules_mut().push(Rule {
            needle: needle.to_string(),
            replies: Replies::Fixed(VecDeque::from([Err(error)])),
        });
        self
    }

    /// Sleep this long (tokio time) before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of recorded commands containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.joined().contains(needle))
            .count()
    }

    fn rules_mut(&mut self) -> &mut Vec<Rule> {
        self.rules.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    fn reply_for(&self, call: &RecordedCall) -> Result<RawOutput, RuntimeError> {
        let joined = call.joined();
        let mut rules = lock(&self.rules);
        let Some(rule) = rules.iter_mut().find(|r| joined.contains(&r.needle)) else {
            return Ok(RawOutput::ok(""));
        };
        match &mut rule.replies {
            Replies::Dynamic(respond) => Ok(respond(call)),
            Replies::Fixed(replies) => {
                if replies.len() > 1 {
                    if let Some(next) = replies.pop_front() {
                        return next;
                    }
                }
                replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Ok(RawOutput::ok("")))
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    async fn execute(
        &self,
        sandbox_id: &str,
        command: &[String],
        working_directory: &str,
    ) -> Result<RawOutput, RuntimeError> {
        let call = RecordedCall {
            sandbox_id: sandbox_id.to_string(),
            command: command.to_vec(),
            working_directory: working_directory.to_string(),
        };
        lock(&self.calls).push(call.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply_for(&call)
    }
}

/// Tool handler that counts calls and returns a fixed outcome.
#[derive(Debug)]
pub struct CountingHandler {
    calls: AtomicUsize,
    outcome: Result<Option<Value>, WardenError>,
}

impl CountingHandler {
    /// Echo the params back as the result.
    pub fn echo() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(None),
        }
    }

    pub fn returning(value: Value) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(Some(value)),
        }
    }

    pub fn failing(error: WardenError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Err(error),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for CountingHandler {
    async fn handle(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, WardenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(None) => Ok(params),
            Ok(Some(value)) => Ok(value.clone()),
            Err(err) => Err(err.clone()),
        }
    }
}
