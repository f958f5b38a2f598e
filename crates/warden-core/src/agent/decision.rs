//! Decision records and the decide/respond capabilities the loop consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WardenError;
use crate::lifecycle::ServerState;
use crate::tools::ToolSchema;

use super::engine::InvocationRecord;

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ContinueTools,
    RespondToUser,
    NeedInput,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::ContinueTools => "continue_tools",
            Decision::RespondToUser => "respond_to_user",
            Decision::NeedInput => "need_input",
        }
    }
}

/// A tool the decision wants invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "tool", alias = "name")]
    pub tool_id: String,
    #[serde(default, alias = "arguments")]
    pub params: Value,
}

impl ToolCall {
    pub fn new(tool_id: impl Into<String>, params: Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            params,
        }
    }
}

/// One iteration's decision. `retry_count` and `last_error` are stamped by
/// the loop, not trusted from the decider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub reasoning: String,
    pub decision: Decision,
    pub confidence: f32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl DecisionRecord {
    pub fn continue_with(reasoning: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            reasoning: reasoning.into(),
            decision: Decision::ContinueTools,
            confidence: 0.8,
            retry_count: 0,
            last_error: None,
            tool_calls,
        }
    }

    pub fn respond(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::RespondToUser,
            ..Self::continue_with(reasoning, Vec::new())
        }
    }

    pub fn need_input(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::NeedInput,
            ..Self::continue_with(reasoning, Vec::new())
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Failure of the decide or respond capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecideError {
    /// Output arrived but is not a decision.
    #[error("unparseable decision: {0}")]
    Parsing(String),

    /// The capability could not be reached.
    #[error("decision capability unavailable: {0}")]
    Unavailable(String),
}

impl From<DecideError> for WardenError {
    fn from(err: DecideError) -> Self {
        match err {
            DecideError::Parsing(reason) => WardenError::ParsingError { reason },
            DecideError::Unavailable(reason) => WardenError::failed(reason),
        }
    }
}

/// Parse a decision from model text: a JSON object, bare or in a fenced
/// code block, possibly surrounded by prose.
pub fn parse_decision(text: &str) -> Result<DecisionRecord, DecideError> {
    let body = fenced_body(text).unwrap_or(text);
    let start = body
        .find('{')
        .ok_or_else(|| DecideError::Parsing("no JSON object found".to_string()))?;
    let end = body
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| DecideError::Parsing("unterminated JSON object".to_string()))?;

    let mut record: DecisionRecord = serde_json::from_str(&body[start..=end])
        .map_err(|e| DecideError::Parsing(e.to_string()))?;
    record.confidence = clamp_confidence(record.confidence);
    Ok(record)
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // skip the info string (`json`) up to the end of the line
    let body_start = after.find('\n').map_or(0, |i| i + 1);
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// What the loop knows about the sandbox when asking for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSnapshot {
    pub sandbox_id: String,
    pub workspace_root: String,
    pub dev_server: Option<ServerState>,
}

/// Input to the decide capability.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub user_request: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub sandbox: Option<SandboxSnapshot>,
    pub available_tools: Vec<ToolSchema>,
    pub history: Vec<InvocationRecord>,
}

/// Input to the respond capability.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseContext {
    pub user_request: String,
    pub reasoning: String,
    pub sandbox: Option<SandboxSnapshot>,
    pub invocations: Vec<InvocationRecord>,
}

/// Produces the next decision. Opaque to the loop.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, ctx: &DecisionContext) -> Result<DecisionRecord, DecideError>;
}

/// Produces the user-facing answer for `respond_to_user`.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, ctx: &ResponseContext) -> Result<String, DecideError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bare_json() {
        let r = parse_decision(
            r#"{"reasoning":"read it","decision":"continue_tools","confidence":0.9,
                "tool_calls":[{"tool_id":"read_file","params":{"path":"a"}}]}"#,
        )
        .unwrap();
        assert_eq!(r.decision, Decision::ContinueTools);
        assert_eq!(r.tool_calls[0].tool_id, "read_file");
        assert_eq!(r.tool_calls[0].params, json!({"path": "a"}));
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let text = "Here is my plan:\n```json\n{\"reasoning\":\"done\",\"decision\":\"respond_to_user\",\"confidence\":1.5}\n```\nThanks";
        let r = parse_decision(text).unwrap();
        assert_eq!(r.decision, Decision::RespondToUser);
        assert_eq!(r.confidence, 1.0);
        assert!(r.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_tool_alias() {
        let r = parse_decision(
            r#"{"reasoning":"x","decision":"continue_tools","confidence":0.5,
                "tool_calls":[{"name":"list_files","arguments":{}}]}"#,
        )
        .unwrap();
        assert_eq!(r.tool_calls[0].tool_id, "list_files");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_decision("I think we are done."), Err(DecideError::Parsing(_))));
        assert!(matches!(
            parse_decision(r#"{"reasoning":"x","decision":"dance","confidence":0.5}"#),
            Err(DecideError::Parsing(_))
        ));
    }

    #[test]
    fn test_decide_error_maps_to_taxonomy() {
        let e: WardenError = DecideError::Parsing("bad".into()).into();
        assert_eq!(e.kind(), "parsing_error");
    }
}
