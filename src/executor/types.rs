//! Wire types for the task executor pool interface.
//!
//! The pool is an external collaborator: it receives a task description
//! plus injected memory context and returns a structured completion
//! report. Its `claimed_done` flag never drives control flow by itself;
//! completion is judged by the quality gate and, above that, by observable
//! backlog state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

/// Request sent to the executor pool for one work item attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub item_id: String,
    pub description: String,
    pub category: String,
    /// Memory patterns injected as context, highest score first. This is
    /// the sole channel through which past experience reaches the executor.
    #[serde(default)]
    pub injected_context: Vec<String>,
    /// 1-based attempt counter; retries carry gate feedback in
    /// `injected_context`.
    pub attempt: u32,
}

/// Structured completion report returned by an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub summary: String,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    #[serde(default)]
    pub claimed_done: bool,
}

/// A task executor with bounded latency and possible failure.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, req: &TaskRequest) -> Result<TaskReport, ExecutorError>;
}
