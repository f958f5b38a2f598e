//! Deterministic decide/respond capabilities.
//!
//! [`ReplayDecider`] hands out a prepared sequence of decisions, which is
//! how `warden replay` drives the loop without a model, and how tests pin
//! the loop's behavior. [`SummaryResponder`] answers from the invocation log.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::decision::{
    parse_decision, DecideError, Decider, DecisionContext, DecisionRecord, Responder,
    ResponseContext,
};

/// Replays decisions in order, repeating the last one once exhausted.
#[derive(Debug)]
pub struct ReplayDecider {
    queue: Mutex<VecDeque<Result<DecisionRecord, DecideError>>>,
    seen: Mutex<Vec<DecisionContext>>,
}

impl ReplayDecider {
    pub fn new(decisions: Vec<DecisionRecord>) -> Self {
        Self::from_results(decisions.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<DecisionRecord, DecideError>>) -> Self {
        Self {
            queue: Mutex::new(results.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Parse each text with [`parse_decision`]; unparseable entries replay
    /// as parsing errors.
    pub fn from_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        Self::from_results(texts.iter().map(|t| parse_decision(t.as_ref())).collect())
    }

    /// Contexts the loop passed in, oldest first.
    pub fn contexts(&self) -> Vec<DecisionContext> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Decider for ReplayDecider {
    async fn decide(&self, ctx: &DecisionContext) -> Result<DecisionRecord, DecideError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ctx.clone());

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() > 1 {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| Err(DecideError::Unavailable("no decisions to replay".to_string())))
    }
}

/// Answers with the decision's reasoning and a line per tool call.
#[derive(Debug, Default)]
pub struct SummaryResponder;

#[async_trait]
impl Responder for SummaryResponder {
    async fn respond(&self, ctx: &ResponseContext) -> Result<String, DecideError> {
        let mut out = ctx.reasoning.clone();
        for inv in &ctx.invocations {
            let status = if inv.success { "ok" } else { "failed" };
            out.push_str(&format!("\n- {} ({status})", inv.tool_id));
        }
        Ok(out)
    }
}
