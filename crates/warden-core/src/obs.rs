//! Structured observability hooks for tool dispatch, sandbox execution and
//! the agent loop.
//!
//! Every helper logs a single event carrying an `event` field so log
//! pipelines can filter on it regardless of the message text.

use tracing::{debug, info, warn};

use crate::error::WardenError;

/// Request-scoped span a decision loop run is instrumented with.
pub fn loop_span(request_id: &str) -> tracing::Span {
    tracing::info_span!("warden.loop", request_id = %request_id)
}

pub fn emit_tool_dispatched(tool_id: &str, request_id: &str, success: bool, elapsed_ms: u64) {
    info!(
        event = "tool.dispatched",
        tool_id = %tool_id,
        request_id = %request_id,
        success = success,
        elapsed_ms = elapsed_ms,
    );
}

pub fn emit_tool_rejected(tool_id: &str, request_id: &str, error: &WardenError) {
    warn!(
        event = "tool.rejected",
        tool_id = %tool_id,
        request_id = %request_id,
        kind = error.kind(),
        error = %error,
    );
}

pub fn emit_gateway_denied(sandbox_id: &str, reason: &str) {
    warn!(event = "gateway.denied", sandbox_id = %sandbox_id, reason = %reason);
}

pub fn emit_gateway_timeout(sandbox_id: &str, timeout_ms: u64) {
    warn!(event = "gateway.timeout", sandbox_id = %sandbox_id, timeout_ms = timeout_ms);
}

pub fn emit_devserver_started(sandbox_id: &str, pid: Option<u32>, url: Option<&str>) {
    info!(
        event = "devserver.started",
        sandbox_id = %sandbox_id,
        pid = ?pid,
        url = url.unwrap_or("-"),
    );
}

pub fn emit_restart_refused(sandbox_id: &str, error: &WardenError) {
    warn!(event = "devserver.restart_refused", sandbox_id = %sandbox_id, error = %error);
}

pub fn emit_agent_iteration(retry_count: u32, decision: &str, confidence: f32) {
    debug!(
        event = "agent.iteration",
        retry_count = retry_count,
        decision = %decision,
        confidence = confidence,
    );
}

pub fn emit_agent_finished(state: &str, attempts: u32, success: bool) {
    info!(
        event = "agent.finished",
        state = %state,
        attempts = attempts,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_span_enter() {
        let span = loop_span("req-1");
        let _entered = span.enter();
        emit_agent_iteration(0, "continue_tools", 0.5);
    }
}
