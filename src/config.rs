//! Foreman configuration loaded from `foreman.toml`.
//!
//! [`ForemanConfig`] holds every tunable policy knob: gate threshold, memory
//! capacity and decay, claim TTL, retry caps, and supervisor budgets. Values
//! absent from the file use the defaults below. The environment variables
//! `FOREMAN_EXECUTOR_URL` and `FOREMAN_EXECUTOR_TOKEN` take precedence over
//! the file for the executor endpoint.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration loaded from `foreman.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForemanConfig {
    /// Directory holding all durable state (backlog, memory, runs, decisions).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Task executor pool endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// HTTP endpoint of the executor pool. Empty means stub mode.
    #[serde(default)]
    pub endpoint: String,

    /// Bearer token sent with executor requests.
    #[serde(default)]
    pub token: String,

    /// Agent type label used for memory bucketing and context retrieval.
    #[serde(default = "default_agent_type")]
    pub agent_type: String,

    /// Per-item execution timeout in seconds.
    #[serde(default = "default_item_timeout_secs")]
    pub timeout_secs: u64,
}

/// Quality gate rubric settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Minimum total (out of 25) for a Pass verdict.
    #[serde(default = "default_gate_threshold")]
    pub threshold: u8,
}

/// Learning memory settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Active-pattern cap per (category, agent_type) bucket.
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,

    /// Minimum score for a pattern to be injected as context.
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

/// Orchestrator dispatch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of items dispatched concurrently per cycle.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Gate-failure retries per item before escalation.
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,

    /// Claim time-to-live in seconds; expired claims are re-claimable.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    /// Base delay in milliseconds for retry backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Continuation supervisor budgets and caps.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum orchestrator cycles per supervised run.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    /// Wall-clock budget in seconds for a supervised run.
    #[serde(default = "default_max_wall_secs")]
    pub max_wall_secs: u64,

    /// Consecutive no-progress cycles before escalation.
    #[serde(default = "default_failure_cap")]
    pub failure_cap: u32,
}

fn default_data_dir() -> String {
    ".foreman".to_string()
}

fn default_agent_type() -> String {
    "builder".to_string()
}

fn default_item_timeout_secs() -> u64 {
    300
}

fn default_gate_threshold() -> u8 {
    18
}

fn default_memory_capacity() -> usize {
    15
}

fn default_min_score() -> u8 {
    5
}

fn default_max_parallel() -> usize {
    3
}

fn default_retry_cap() -> u32 {
    2
}

fn default_claim_ttl_secs() -> u64 {
    900
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_cycles() -> u32 {
    12
}

fn default_max_wall_secs() -> u64 {
    3600
}

fn default_failure_cap() -> u32 {
    3
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            executor: ExecutorConfig::default(),
            gate: GateConfig::default(),
            memory: MemoryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            agent_type: default_agent_type(),
            timeout_secs: default_item_timeout_secs(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: default_gate_threshold(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            min_score: default_min_score(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            retry_cap: default_retry_cap(),
            claim_ttl_secs: default_claim_ttl_secs(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            max_wall_secs: default_max_wall_secs(),
            failure_cap: default_failure_cap(),
        }
    }
}

impl ForemanConfig {
    /// Loads configuration from `foreman.toml` in the current directory.
    /// Falls back to defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("foreman.toml"))
    }

    /// Loads configuration from an explicit path, applying env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ForemanConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for executor access.
        if let Ok(url) = std::env::var("FOREMAN_EXECUTOR_URL")
            && !url.is_empty()
        {
            config.executor.endpoint = url;
        }
        if let Ok(token) = std::env::var("FOREMAN_EXECUTOR_TOKEN")
            && !token.is_empty()
        {
            config.executor.token = token;
        }

        Ok(config)
    }
}
