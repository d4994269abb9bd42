use async_trait::async_trait;

use crate::error::ExecutorError;

use super::types::{TaskExecutor, TaskReport, TaskRequest};

/// Offline executor used when no pool endpoint is configured.
///
/// Returns a deterministic report derived from the request so the rest of
/// the pipeline (gate, memory, checkpoint) can be exercised end to end.
#[derive(Debug, Default)]
pub struct StubExecutor;

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn execute(&self, req: &TaskRequest) -> Result<TaskReport, ExecutorError> {
        Ok(TaskReport {
            summary: format!(
                "Implemented {}: applied the requested change, covered the empty \
                 input edge case with error handling for malformed values, and \
                 validated the result. All tests pass and the output was manually \
                 checked against the task description.",
                req.description
            ),
            artifact_refs: vec![
                format!("stub-{}-a", req.item_id.to_lowercase()),
                format!("stub-{}-b", req.item_id.to_lowercase()),
            ],
            claimed_done: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_reports_are_deterministic() {
        let stub = StubExecutor;
        let req = TaskRequest {
            item_id: "X-001".into(),
            description: "adjust the widget".into(),
            category: "ops".into(),
            injected_context: vec![],
            attempt: 1,
        };
        let a = stub.execute(&req).await.unwrap();
        let b = stub.execute(&req).await.unwrap();
        assert_eq!(a.summary, b.summary);
        assert!(a.claimed_done);
        assert_eq!(a.artifact_refs.len(), 2);
    }
}
