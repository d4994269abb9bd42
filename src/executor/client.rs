use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ExecutorError;

use super::types::{TaskExecutor, TaskReport, TaskRequest};

/// HTTP client for a remote executor pool endpoint.
pub struct HttpExecutor {
    endpoint: String,
    token: Option<String>,
    client: Client,
}

impl HttpExecutor {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            endpoint,
            token,
            client,
        }
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, req: &TaskRequest) -> Result<TaskReport, ExecutorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(req);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout
            } else {
                ExecutorError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ExecutorError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<TaskReport>()
            .await
            .map_err(|e| ExecutorError::Parse(e.to_string()))
    }
}
