use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::types::Task;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_tasks: usize,
    pub avg_processing_time_ms: f64,
}

/// Append-only log of finished tasks.
pub trait TaskHistory: Send + Sync {
    fn record(&self, task: Task);
    /// Most recent first.
    fn recent(&self, limit: usize) -> Vec<Task>;
    fn stats(&self) -> HistoryStats;
    /// Operator reset; returns how many tasks were dropped.
    fn clear(&self) -> usize;
}

#[derive(Clone, Default)]
pub struct InMemoryTaskHistory {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl InMemoryTaskHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskHistory for InMemoryTaskHistory {
    fn record(&self, task: Task) {
        let mut tasks = self.tasks.write().unwrap();
        tasks.push(task);
    }

    fn recent(&self, limit: usize) -> Vec<Task> {
        let tasks = self.tasks.read().unwrap();
        tasks.iter().rev().take(limit).cloned().collect()
    }

    fn stats(&self) -> HistoryStats {
        let tasks = self.tasks.read().unwrap();
        if tasks.is_empty() {
            return HistoryStats::default();
        }
        let total: u64 = tasks.iter().map(|t| t.processing_time_ms).sum();
        HistoryStats {
            total_tasks: tasks.len(),
            avg_processing_time_ms: total as f64 / tasks.len() as f64,
        }
    }

    fn clear(&self) -> usize {
        let mut tasks = self.tasks.write().unwrap();
        let dropped = tasks.len();
        tasks.clear();
        dropped
    }
}
