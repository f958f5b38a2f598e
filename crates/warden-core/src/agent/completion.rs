//! Task-completion heuristic over tool output.
//!
//! Marker scanning is a guess. Known misreads: a log line such as
//! "no error found" counts as a failure, and a file whose content mentions
//! "success" counts as success. The loop only treats
//! [`Verdict::Complete`] as terminal, so a wrong `Failed` or `Inconclusive`
//! costs an iteration, never a premature stop with failure markers present.

use regex::Regex;
use serde_json::Value;

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Success markers and no failure markers.
    Complete,
    /// At least one failure marker.
    Failed,
    Inconclusive,
}

/// Decides whether a successful tool result finishes the task.
pub trait CompletionStrategy: Send + Sync {
    fn evaluate(&self, output: &Value) -> Verdict;
}

/// Case-insensitive whole-word marker matching.
#[derive(Debug, Clone)]
pub struct MarkerHeuristic {
    success: Vec<Regex>,
    failure: Vec<Regex>,
}

impl MarkerHeuristic {
    pub fn new<S: AsRef<str>>(success: &[S], failure: &[S]) -> Result<Self, regex::Error> {
        Ok(Self {
            success: compile(success)?,
            failure: compile(failure)?,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, regex::Error> {
        Self::new(&config.success_markers, &config.failure_markers)
    }

    /// Number of success and failure markers found in `text`.
    pub fn score(&self, text: &str) -> (usize, usize) {
        let hits = |set: &[Regex]| set.iter().filter(|r| r.is_match(text)).count();
        (hits(&self.success), hits(&self.failure))
    }
}

impl CompletionStrategy for MarkerHeuristic {
    fn evaluate(&self, output: &Value) -> Verdict {
        let text = flatten(output);
        match self.score(&text) {
            (_, failures) if failures > 0 => Verdict::Failed,
            (successes, _) if successes > 0 => Verdict::Complete,
            _ => Verdict::Inconclusive,
        }
    }
}

fn compile<S: AsRef<str>>(markers: &[S]) -> Result<Vec<Regex>, regex::Error> {
    markers
        .iter()
        .map(|m| m.as_ref().trim())
        .filter(|m| !m.is_empty())
        .map(|m| {
            let word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric() || c == '_');
            let lead = if word(m.chars().next()) { r"\b" } else { "" };
            let trail = if word(m.chars().last()) { r"\b" } else { "" };
            Regex::new(&format!("(?i){lead}{}{trail}", regex::escape(m)))
        })
        .collect()
}

/// String and scalar leaves joined by newlines. Object keys are skipped so
/// a field named `error` with a null value is not a failure.
fn flatten(value: &Value) -> String {
    let mut out = Vec::new();
    collect(value, &mut out);
    out.join("\n")
}

fn collect(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(b.to_string()),
        Value::Number(n) => out.push(n.to_string()),
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect(v, out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn heuristic() -> MarkerHeuristic {
        MarkerHeuristic::from_config(&AgentConfig::default()).unwrap()
    }

    #[test]
    fn test_success_without_failure_completes() {
        let v = json!({"stdout": "Build completed successfully\n", "exit_code": 0});
        assert_eq!(heuristic().evaluate(&v), Verdict::Complete);
    }

    #[test]
    fn test_any_failure_marker_wins() {
        let v = json!({"stdout": "compiled with 1 ERROR"});
        assert_eq!(heuristic().evaluate(&v), Verdict::Failed);
    }

    #[test]
    fn test_word_boundaries() {
        // "errors" and "okay" are not the markers "error" and "ok"
        let h = MarkerHeuristic::new(&["ok"], &["error"]).unwrap();
        assert_eq!(h.evaluate(&json!("no errors, okay")), Verdict::Inconclusive);
        assert_eq!(h.evaluate(&json!("OK.")), Verdict::Complete);
    }

    #[test]
    fn test_keys_are_ignored() {
        let h = MarkerHeuristic::new(&["done"], &["error"]).unwrap();
        assert_eq!(h.evaluate(&json!({"error": null, "status": "done"})), Verdict::Complete);
        assert_eq!(h.evaluate(&json!({"listing": ["a.ts", "b.ts"]})), Verdict::Inconclusive);
    }

    #[test]
    fn test_multi_word_and_symbol_markers() {
        let h = MarkerHeuristic::new(&["✓"], &["not found"]).unwrap();
        assert_eq!(h.evaluate(&json!("✓ 12 tests")), Verdict::Complete);
        assert_eq!(h.evaluate(&json!("module Not Found")), Verdict::Failed);
    }
}
