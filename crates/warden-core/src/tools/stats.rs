//! Per-tool execution statistics. Observability only.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_execution_time_ms: f64,
}

impl ToolStats {
    fn record(&mut self, success: bool, elapsed_ms: u64) {
        let previous_total = self.avg_execution_time_ms * self.total_calls as f64;
        self.total_calls += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.avg_execution_time_ms = (previous_total + elapsed_ms as f64) / self.total_calls as f64;
    }
}

#[derive(Debug, Default)]
pub struct StatsTable {
    by_tool: Mutex<HashMap<String, ToolStats>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, tool_id: &str, success: bool, elapsed_ms: u64) {
        self.by_tool
            .lock()
            .await
            .entry(tool_id.to_string())
            .or_default()
            .record(success, elapsed_ms);
    }

    pub async fn get(&self, tool_id: &str) -> Option<ToolStats> {
        self.by_tool.lock().await.get(tool_id).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ToolStats> {
        self.by_tool
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
