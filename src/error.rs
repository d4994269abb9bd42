use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backlog::ItemStatus;

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Work item already exists: {0}")]
    DuplicateItem(String),

    #[error("Work item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {item} is claimed by {holder} until {expires}")]
    ClaimConflict {
        item: String,
        holder: String,
        expires: DateTime<Utc>,
    },

    #[error("Invalid transition for {item}: {from} -> {to}")]
    InvalidTransition {
        item: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already started: {0}")]
    DuplicateRun(String),

    #[error("Phase order violation in run {run}: {reason}")]
    PhaseOrder { run: String, reason: String },

    #[error("Decision entry not found: {0}")]
    DecisionNotFound(String),

    #[error("Archived pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Executor request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse executor response: {0}")]
    Parse(String),
}
