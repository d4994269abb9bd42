//! Cycle engine: select ready items, dispatch them to isolated parallel
//! executors, gate the results, and update the stores.
//!
//! Each cycle ends in a [`CycleReport`], the only channel back to the
//! supervisor. Internal reasoning is discarded so nothing leaks between
//! cycles; every claim must be re-derivable from backlog and checkpoint
//! state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backlog::{BacklogStore, ItemStatus, WorkItem};
use crate::config::ForemanConfig;
use crate::decisions::{DecisionOption, DecisionQueue};
use crate::error::{ExecutorError, ForemanError};
use crate::executor::{TaskExecutor, TaskReport, TaskRequest};
use crate::gate::{GateReport, QualityEvaluation, QualityGate, Verdict};
use crate::memory::{MemoryStore, PatternKind};

/// Per-cycle policy knobs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub max_parallel: usize,
    pub retry_cap: u32,
    pub claim_ttl_secs: u64,
    pub item_timeout: Duration,
    pub base_delay_ms: u64,
    pub memory_min_score: u8,
    pub agent_type: String,
}

impl CycleSettings {
    pub fn from_config(config: &ForemanConfig) -> Self {
        Self {
            max_parallel: config.orchestrator.max_parallel,
            retry_cap: config.orchestrator.retry_cap,
            claim_ttl_secs: config.orchestrator.claim_ttl_secs,
            item_timeout: Duration::from_secs(config.executor.timeout_secs),
            base_delay_ms: config.orchestrator.base_delay_ms,
            memory_min_score: config.memory.min_score,
            agent_type: config.executor.agent_type.clone(),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1)))
    }
}

/// How one dispatched item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Completed,
    Escalated,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub disposition: Disposition,
    pub attempts: u32,
    pub gate_total: Option<u8>,
    pub artifact_refs: Vec<String>,
}

/// Structured result of one orchestrator cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub attempted: usize,
    pub passed: usize,
    pub failed: usize,
    pub remaining_ready: usize,
    pub escalations: usize,
    pub outcomes: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl CycleReport {
    /// One-line continuation context handed to the next cycle. A summary,
    /// not raw state.
    pub fn continuation(&self) -> String {
        format!(
            "last cycle attempted {} item(s): {} passed, {} failed, {} escalated; {} ready remain",
            self.attempted, self.passed, self.failed, self.escalations, self.remaining_ready
        )
    }
}

// What a dispatch worker hands back to the collection phase. Workers never
// touch shared state; everything they know rides in this struct.
struct ItemResult {
    item: WorkItem,
    passed: bool,
    attempts: u32,
    evaluation: Option<QualityEvaluation>,
    report: Option<TaskReport>,
    last_error: Option<String>,
}

pub struct Orchestrator {
    backlog: Arc<BacklogStore>,
    memory: Arc<MemoryStore>,
    decisions: Arc<DecisionQueue>,
    gate: QualityGate,
    executor: Arc<dyn TaskExecutor>,
    settings: CycleSettings,
    executor_id: String,
}

impl Orchestrator {
    pub fn new(
        backlog: Arc<BacklogStore>,
        memory: Arc<MemoryStore>,
        decisions: Arc<DecisionQueue>,
        gate: QualityGate,
        executor: Arc<dyn TaskExecutor>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            backlog,
            memory,
            decisions,
            gate,
            executor,
            settings,
            executor_id: format!("foreman-{}", Uuid::new_v4()),
        }
    }

    /// Runs one cycle: select, claim, dispatch in parallel, gate, update.
    ///
    /// `selection` restricts the cycle to specific item ids (phase mode);
    /// `continuation` is the previous cycle's summary, injected as context.
    pub async fn run_cycle(
        &self,
        selection: Option<&[String]>,
        continuation: Option<&str>,
    ) -> Result<CycleReport> {
        let started_at = Utc::now();
        let cycle_id = Uuid::new_v4().to_string();
        let mut outcomes: Vec<ItemOutcome> = Vec::new();

        let candidates = self.select_items(selection)?;
        let mut join_set: JoinSet<ItemResult> = JoinSet::new();
        let mut attempted = 0;

        for item in candidates {
            match self
                .backlog
                .claim(&item.id, &self.executor_id, self.settings.claim_ttl_secs)
            {
                Ok(_) => {}
                Err(ForemanError::ClaimConflict { holder, .. }) => {
                    debug!(item = %item.id, %holder, "skipping claimed item");
                    outcomes.push(ItemOutcome {
                        item_id: item.id.clone(),
                        disposition: Disposition::Skipped,
                        attempts: 0,
                        gate_total: None,
                        artifact_refs: Vec::new(),
                    });
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if let Err(e) = self
                .backlog
                .transition(&item.id, ItemStatus::InProgress, &self.executor_id)
            {
                // Hand the claim back rather than sit on an item we will
                // never dispatch.
                self.backlog.release(&item.id, &self.executor_id)?;
                return Err(e.into());
            }
            attempted += 1;

            let context = self.build_context(&item, continuation)?;
            let executor = Arc::clone(&self.executor);
            let gate = self.gate.clone();
            let settings = self.settings.clone();
            join_set.spawn(attempt_item(executor, gate, settings, item, context));
        }

        // Collect results and apply them through the store chokepoints.
        // All mutation happens here, sequentially, never in the workers.
        let mut passed = 0;
        let mut failed = 0;
        let mut escalations = 0;
        while let Some(joined) = join_set.join_next().await {
            let result = joined?;
            if result.passed {
                passed += 1;
                self.apply_pass(&result)?;
            } else {
                failed += 1;
                escalations += 1;
                self.apply_fail(&result)?;
            }
            outcomes.push(ItemOutcome {
                item_id: result.item.id.clone(),
                disposition: if result.passed {
                    Disposition::Completed
                } else {
                    Disposition::Escalated
                },
                attempts: result.attempts,
                gate_total: result.evaluation.as_ref().map(|e| e.total),
                artifact_refs: result
                    .report
                    .as_ref()
                    .map(|r| r.artifact_refs.clone())
                    .unwrap_or_default(),
            });
        }

        let report = CycleReport {
            cycle_id,
            attempted,
            passed,
            failed,
            remaining_ready: self.backlog.list_ready(None).len(),
            escalations,
            outcomes,
            started_at,
            duration_ms: (Utc::now() - started_at).num_milliseconds(),
        };
        debug!(
            cycle = %report.cycle_id,
            attempted = report.attempted,
            passed = report.passed,
            failed = report.failed,
            "cycle complete"
        );
        Ok(report)
    }

    // Items for this cycle, bounded by max_parallel. In phase mode, items
    // that already reached a terminal status are skipped; that is what
    // makes a re-attempted phase idempotent after a crash.
    fn select_items(&self, selection: Option<&[String]>) -> Result<Vec<WorkItem>> {
        let items = match selection {
            Some(ids) => {
                let mut items = Vec::new();
                for id in ids {
                    let Some(item) = self.backlog.get(id) else {
                        return Err(ForemanError::ItemNotFound(id.clone()).into());
                    };
                    match item.status {
                        ItemStatus::Ready => items.push(item),
                        // A crashed executor left it mid-flight; reclaim it.
                        ItemStatus::InProgress => {
                            self.backlog.reset(id, &self.executor_id)?;
                            if let Some(item) = self.backlog.get(id) {
                                items.push(item);
                            }
                        }
                        _ => debug!(item = %id, status = %item.status, "phase item already settled"),
                    }
                }
                items
            }
            None => self.backlog.list_ready(None),
        };
        Ok(items.into_iter().take(self.settings.max_parallel).collect())
    }

    // Memory patterns above the medium-score bar, plus the continuation
    // summary from the previous cycle.
    fn build_context(&self, item: &WorkItem, continuation: Option<&str>) -> Result<Vec<String>> {
        let mut context = Vec::new();
        if let Some(c) = continuation {
            context.push(format!("continuation: {c}"));
        }
        let patterns = self.memory.retrieve(
            &item.category,
            &self.settings.agent_type,
            self.settings.memory_min_score,
        )?;
        for pattern in patterns {
            context.push(format!("{} pattern: {}", pattern.kind, pattern.text));
        }
        Ok(context)
    }

    fn apply_pass(&self, result: &ItemResult) -> Result<()> {
        self.backlog
            .transition(&result.item.id, ItemStatus::Complete, &self.executor_id)?;
        if let Some(report) = &result.report {
            self.memory.record(
                PatternKind::Success,
                &self.settings.agent_type,
                &result.item.category,
                &pattern_snippet(&report.summary),
                &result.item.id,
            )?;
            self.memory
                .evict_if_over_capacity(&result.item.category, &self.settings.agent_type)?;
        }
        Ok(())
    }

    fn apply_fail(&self, result: &ItemResult) -> Result<()> {
        let why = result
            .evaluation
            .as_ref()
            .map(|e| e.feedback())
            .or_else(|| result.last_error.clone())
            .unwrap_or_else(|| "no report produced".to_string());
        warn!(item = %result.item.id, attempts = result.attempts, %why, "item escalated");

        self.backlog
            .transition(&result.item.id, ItemStatus::WontFix, &self.executor_id)?;
        self.memory.record(
            PatternKind::Failure,
            &self.settings.agent_type,
            &result.item.category,
            &format!("{}: {}", result.item.title, pattern_snippet(&why)),
            &result.item.id,
        )?;
        self.memory
            .evict_if_over_capacity(&result.item.category, &self.settings.agent_type)?;
        self.decisions.push(
            Some(result.item.id.clone()),
            format!(
                "item {} '{}' failed after {} attempt(s): {}",
                result.item.id, result.item.title, result.attempts, why
            ),
            vec![
                DecisionOption {
                    label: "reset".into(),
                    tradeoff: "returns the item to READY for another supervised run".into(),
                },
                DecisionOption {
                    label: "keep_wont_fix".into(),
                    tradeoff: "abandons the item permanently".into(),
                },
            ],
            "reset with a sharper task description".into(),
        )?;
        Ok(())
    }
}

// Isolated dispatch worker: owns its data, talks to the executor with a
// per-attempt timeout, and retries with augmented context up to the cap.
async fn attempt_item(
    executor: Arc<dyn TaskExecutor>,
    gate: QualityGate,
    settings: CycleSettings,
    item: WorkItem,
    mut context: Vec<String>,
) -> ItemResult {
    let max_attempts = settings.retry_cap + 1;
    let mut last_evaluation = None;
    let mut last_report = None;
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let request = TaskRequest {
            item_id: item.id.clone(),
            description: item.title.clone(),
            category: item.category.clone(),
            injected_context: context.clone(),
            attempt,
        };
        let outcome = match timeout(settings.item_timeout, executor.execute(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout),
        };
        match outcome {
            Ok(report) => {
                let evaluation = gate.evaluate(&GateReport {
                    item_id: item.id.clone(),
                    description: item.title.clone(),
                    summary: report.summary.clone(),
                    artifact_refs: report.artifact_refs.clone(),
                    claimed_done: report.claimed_done,
                });
                if evaluation.verdict == Verdict::Pass {
                    return ItemResult {
                        item,
                        passed: true,
                        attempts: attempt,
                        evaluation: Some(evaluation),
                        report: Some(report),
                        last_error: None,
                    };
                }
                context.push(format!("attempt {attempt}: {}", evaluation.feedback()));
                last_evaluation = Some(evaluation);
                last_report = Some(report);
            }
            Err(e) => {
                context.push(format!("attempt {attempt} failed: {e}"));
                last_error = Some(e.to_string());
            }
        }
        if attempt < max_attempts {
            sleep(settings.delay_for_attempt(attempt)).await;
        }
    }

    ItemResult {
        item,
        passed: false,
        attempts: max_attempts,
        evaluation: last_evaluation,
        report: last_report,
        last_error,
    }
}

/// First ~160 characters of a summary, used as the memory pattern text.
fn pattern_snippet(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(160) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
