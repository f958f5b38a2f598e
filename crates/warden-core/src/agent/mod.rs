//! Agent decision loop.
//!
//! - [`decision`]: `DecisionRecord`, `parse_decision`, `Decider`/`Responder`
//! - [`completion`]: swappable "is the task done" strategy
//! - [`engine`]: `AgentLoop`, bounded by `max_retries`
//! - [`replay`]: scripted decider and summary responder

pub mod completion;
pub mod decision;
pub mod engine;
pub mod replay;

pub use completion::{CompletionStrategy, MarkerHeuristic, Verdict};
pub use decision::{
    parse_decision, DecideError, Decider, Decision, DecisionContext, DecisionRecord, Responder,
    ResponseContext, SandboxSnapshot, ToolCall,
};
pub use engine::{AgentLoop, InvocationRecord, LoopConfig, LoopOutcome, LoopState};
pub use replay::{ReplayDecider, SummaryResponder};
