//! Continuation supervisor: the external forcing function.
//!
//! The supervisor never trusts the orchestrator's own claim that nothing
//! is left to do. Every decision is computed from externally observable
//! state (backlog stats, pending decision count, and a failure counter
//! derived from backlog deltas) and the loop halts with a stated reason,
//! never a bare exit. A cooperative guard may veto one premature stop, but
//! the external check is authoritative and holds even if the guard
//! misfires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backlog::{BacklogStore, ItemStatus};
use crate::checkpoint::CheckpointStore;
use crate::config::ForemanConfig;
use crate::decisions::{DecisionOption, DecisionQueue};
use crate::memory::{MemoryStore, PatternKind};
use crate::orchestrator::{CycleReport, Disposition, Orchestrator};

/// Externally observable state snapshot driving every supervisor decision.
#[derive(Debug, Clone, Copy)]
pub struct ObservedState {
    /// Actionable ready items (dependencies deployed).
    pub ready: usize,
    /// Items that reached COMPLETE or DEPLOYED.
    pub complete: usize,
    /// Unresolved decision-queue entries.
    pub pending_decisions: usize,
    /// Cycles that attempted work without growing the complete count.
    pub consecutive_failures: u32,
    pub cycles_run: u32,
    pub elapsed_secs: u64,
}

/// What the supervisor does next. Computed purely from [`ObservedState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorDecision {
    Continue,
    Stop { reason: String },
    Escalate { reason: String },
}

/// Budget and failure caps for a supervised run.
#[derive(Debug, Clone)]
pub struct SupervisorLimits {
    pub max_cycles: u32,
    pub max_wall_secs: u64,
    pub failure_cap: u32,
}

impl SupervisorLimits {
    pub fn from_config(config: &ForemanConfig) -> Self {
        Self {
            max_cycles: config.supervisor.max_cycles,
            max_wall_secs: config.supervisor.max_wall_secs,
            failure_cap: config.supervisor.failure_cap,
        }
    }
}

/// Cooperative callback consulted before a Stop while the loop is live.
///
/// Best-effort only: a veto buys exactly one re-observation. Budget and
/// failure-cap escalations cannot be vetoed.
pub trait ContinuationGuard: Send + Sync {
    fn allow_stop(&self, observed: &ObservedState) -> bool;
}

/// Final result of a supervised run, with the non-silent stop reason.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub cycles: u32,
    pub reports: Vec<CycleReport>,
    pub reason: String,
    pub escalated: bool,
}

// Mutable loop bookkeeping. The counters here are derived from backlog
// deltas, not from cycle reports.
struct LoopState {
    started: Instant,
    cycles_run: u32,
    consecutive_failures: u32,
    continuation: Option<String>,
    reports: Vec<CycleReport>,
    guard_consulted: bool,
}

impl LoopState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            cycles_run: 0,
            consecutive_failures: 0,
            continuation: None,
            reports: Vec::new(),
            guard_consulted: false,
        }
    }
}

pub struct Supervisor {
    orchestrator: Orchestrator,
    backlog: Arc<BacklogStore>,
    memory: Arc<MemoryStore>,
    decisions: Arc<DecisionQueue>,
    checkpoints: Arc<CheckpointStore>,
    limits: SupervisorLimits,
    phase_size: usize,
    stop_signal: Arc<AtomicBool>,
    guard: Option<Box<dyn ContinuationGuard>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Orchestrator,
        backlog: Arc<BacklogStore>,
        memory: Arc<MemoryStore>,
        decisions: Arc<DecisionQueue>,
        checkpoints: Arc<CheckpointStore>,
        limits: SupervisorLimits,
        phase_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            backlog,
            memory,
            decisions,
            checkpoints,
            limits,
            phase_size: phase_size.max(1),
            stop_signal: Arc::new(AtomicBool::new(false)),
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Box<dyn ContinuationGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Handle for external cancellation (signal handler, tests).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Pure decision function over external state. Order matters: a
    /// drained backlog stops cleanly even when budgets are exhausted.
    pub fn decide(observed: &ObservedState, limits: &SupervisorLimits) -> SupervisorDecision {
        if observed.ready == 0 && observed.pending_decisions == 0 {
            return SupervisorDecision::Stop {
                reason: "backlog drained: no ready items and no pending escalations".into(),
            };
        }
        if observed.consecutive_failures >= limits.failure_cap {
            return SupervisorDecision::Escalate {
                reason: format!(
                    "consecutive failure cap ({}) reached",
                    limits.failure_cap
                ),
            };
        }
        if observed.elapsed_secs >= limits.max_wall_secs {
            return SupervisorDecision::Escalate {
                reason: format!(
                    "wall-clock budget ({}s) exhausted",
                    limits.max_wall_secs
                ),
            };
        }
        if observed.cycles_run >= limits.max_cycles {
            return SupervisorDecision::Escalate {
                reason: format!("cycle budget ({}) exhausted", limits.max_cycles),
            };
        }
        if observed.ready == 0 {
            return SupervisorDecision::Stop {
                reason: format!(
                    "waiting on {} pending decision(s)",
                    observed.pending_decisions
                ),
            };
        }
        SupervisorDecision::Continue
    }

    /// Runs checkpointed orchestrator cycles until the backlog is verifiably
    /// done, a budget or failure cap trips, or a stop signal arrives.
    pub async fn run_until_done(&self) -> Result<RunOutcome> {
        let mut state = LoopState::new();
        loop {
            if self.stop_signal.load(Ordering::Relaxed) {
                return Ok(self.outcome(state, "stop signal received", false));
            }
            let observed = self.observe(&state);
            match Self::decide(&observed, &self.limits) {
                SupervisorDecision::Continue => {}
                SupervisorDecision::Stop { reason } => {
                    if !state.guard_consulted
                        && let Some(guard) = &self.guard
                        && !guard.allow_stop(&observed)
                    {
                        // One re-observation, then the external check rules.
                        warn!("cooperative guard vetoed stop; re-observing");
                        state.guard_consulted = true;
                        continue;
                    }
                    info!(%reason, "supervisor stopping");
                    return Ok(self.outcome(state, &reason, false));
                }
                SupervisorDecision::Escalate { reason } => {
                    self.push_escalation(&reason, &observed)?;
                    return Ok(self.outcome(state, &reason, true));
                }
            }

            // Plan a checkpointed run over the current ready set. Items
            // that become ready later belong to the next run.
            let ready = self.backlog.list_ready(None);
            let phases: Vec<Vec<String>> = ready
                .chunks(self.phase_size)
                .map(|chunk| chunk.iter().map(|i| i.id.clone()).collect())
                .collect();
            let run_id = format!("run-{}", Uuid::new_v4());
            self.checkpoints.start_run(&run_id, &phases)?;
            if let Some((reason, escalated)) = self.execute_run(&run_id, &mut state).await? {
                return Ok(self.outcome(state, &reason, escalated));
            }
        }
    }

    /// Continues an interrupted run from its first non-Done phase, then
    /// stops. Phase bodies are idempotent: items already settled by the
    /// crashed run are skipped inside the cycle.
    pub async fn resume_run(&self, run_id: &str) -> Result<RunOutcome> {
        let mut state = LoopState::new();
        match self.execute_run(run_id, &mut state).await? {
            Some((reason, escalated)) => Ok(self.outcome(state, &reason, escalated)),
            None => Ok(self.outcome(state, "resumed run completed", false)),
        }
    }

    // Drives one checkpointed run phase by phase. Returns Some((reason,
    // escalated)) when the loop must halt; None when the run finished and
    // was summarized into memory.
    async fn execute_run(
        &self,
        run_id: &str,
        state: &mut LoopState,
    ) -> Result<Option<(String, bool)>> {
        while let Some(index) = self.checkpoints.resume(run_id)? {
            if self.stop_signal.load(Ordering::Relaxed) {
                // The run stays retained; `resume` picks it back up.
                return Ok(Some(("stop signal received".into(), false)));
            }
            let observed = self.observe(state);
            if let SupervisorDecision::Escalate { reason } =
                Self::decide(&observed, &self.limits)
            {
                self.push_escalation(&reason, &observed)?;
                return Ok(Some((reason, true)));
            }

            let run = self.checkpoints.load(run_id)?;
            let assigned = run.phases[index].assigned_items.clone();
            let planned = assigned
                .iter()
                .filter(|id| {
                    self.backlog.get(id).is_some_and(|i| {
                        matches!(i.status, ItemStatus::Ready | ItemStatus::InProgress)
                    })
                })
                .count();

            self.checkpoints.begin_phase(run_id, index)?;
            let complete_before = self.completed_count();
            let report = match self
                .orchestrator
                .run_cycle(Some(assigned.as_slice()), state.continuation.as_deref())
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    // Record the failure durably so `resume` points back at
                    // this phase, then surface the error.
                    self.checkpoints.fail_phase(run_id, index, &e.to_string())?;
                    return Err(e);
                }
            };
            state.cycles_run += 1;

            // Progress is judged from the backlog, not the report.
            let complete_after = self.completed_count();
            if complete_after > complete_before {
                state.consecutive_failures = 0;
            } else if planned > 0 {
                state.consecutive_failures += 1;
            }

            let all_settled = assigned.iter().all(|id| {
                self.backlog
                    .get(id)
                    .map(|i| i.status.is_terminal())
                    .unwrap_or(true)
            });
            if all_settled {
                let artifacts: Vec<String> = report
                    .outcomes
                    .iter()
                    .filter(|o| o.disposition == Disposition::Completed)
                    .flat_map(|o| o.artifact_refs.clone())
                    .collect();
                self.checkpoints.complete_phase(run_id, index, &artifacts)?;
            }
            // Unsettled items leave the phase Active: `resume` points back
            // here, and the failure cap bounds how long that can repeat.

            state.continuation = Some(report.continuation());
            state.reports.push(report);
        }

        let summary = self.checkpoints.finish_run(run_id)?;
        self.memory
            .record(PatternKind::Success, "supervisor", "run", &summary, run_id)?;
        Ok(None)
    }

    fn observe(&self, state: &LoopState) -> ObservedState {
        let stats = self.backlog.stats();
        ObservedState {
            ready: stats.actionable,
            complete: stats.complete + stats.deployed,
            pending_decisions: self.decisions.pending().map(|p| p.len()).unwrap_or(0),
            consecutive_failures: state.consecutive_failures,
            cycles_run: state.cycles_run,
            elapsed_secs: state.started.elapsed().as_secs(),
        }
    }

    fn completed_count(&self) -> usize {
        let stats = self.backlog.stats();
        stats.complete + stats.deployed
    }

    fn push_escalation(&self, reason: &str, observed: &ObservedState) -> Result<()> {
        warn!(%reason, "supervisor escalating");
        self.decisions.push(
            None,
            format!(
                "supervised run halted: {reason}. Observed state: {} ready, {} complete, \
                 {} pending decision(s), {} consecutive failure(s), {} cycle(s) run.",
                observed.ready,
                observed.complete,
                observed.pending_decisions,
                observed.consecutive_failures,
                observed.cycles_run
            ),
            vec![
                DecisionOption {
                    label: "raise_budget_and_rerun".into(),
                    tradeoff: "spends more on a backlog that may be systemically stuck".into(),
                },
                DecisionOption {
                    label: "halt_and_investigate".into(),
                    tradeoff: "pauses all autonomous progress until a human looks".into(),
                },
            ],
            "halt_and_investigate: repeated failure is a signal, not noise".into(),
        )?;
        Ok(())
    }

    fn outcome(&self, state: LoopState, reason: &str, escalated: bool) -> RunOutcome {
        RunOutcome {
            cycles: state.cycles_run,
            reports: state.reports,
            reason: reason.to_string(),
            escalated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{Priority, WorkItem};
    use crate::checkpoint::PhaseStatus;
    use crate::error::ExecutorError;
    use crate::executor::{TaskExecutor, TaskReport, TaskRequest};
    use crate::gate::QualityGate;
    use crate::orchestrator::CycleSettings;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    fn limits() -> SupervisorLimits {
        SupervisorLimits {
            max_cycles: 20,
            max_wall_secs: 3600,
            failure_cap: 3,
        }
    }

    fn observed(
        ready: usize,
        pending: usize,
        failures: u32,
        cycles: u32,
        elapsed: u64,
    ) -> ObservedState {
        ObservedState {
            ready,
            complete: 0,
            pending_decisions: pending,
            consecutive_failures: failures,
            cycles_run: cycles,
            elapsed_secs: elapsed,
        }
    }

    // --- decide() pure tests ---

    #[test]
    fn decide_stops_when_backlog_drained() {
        let decision = Supervisor::decide(&observed(0, 0, 0, 5, 10), &limits());
        assert!(matches!(decision, SupervisorDecision::Stop { .. }));
    }

    #[test]
    fn decide_continues_while_work_remains() {
        let decision = Supervisor::decide(&observed(3, 0, 0, 5, 10), &limits());
        assert_eq!(decision, SupervisorDecision::Continue);
    }

    #[test]
    fn decide_escalates_on_failure_cap() {
        let decision = Supervisor::decide(&observed(3, 0, 3, 5, 10), &limits());
        match decision {
            SupervisorDecision::Escalate { reason } => {
                assert!(reason.contains("consecutive failure cap"));
            }
            other => panic!("expected Escalate, got {other:?}"),
        }
    }

    #[test]
    fn decide_escalates_on_cycle_budget() {
        let decision = Supervisor::decide(&observed(3, 0, 0, 20, 10), &limits());
        match decision {
            SupervisorDecision::Escalate { reason } => {
                assert!(reason.contains("cycle budget"));
            }
            other => panic!("expected Escalate, got {other:?}"),
        }
    }

    #[test]
    fn decide_escalates_on_wall_clock_budget() {
        let decision = Supervisor::decide(&observed(3, 0, 0, 5, 3600), &limits());
        match decision {
            SupervisorDecision::Escalate { reason } => {
                assert!(reason.contains("wall-clock"));
            }
            other => panic!("expected Escalate, got {other:?}"),
        }
    }

    #[test]
    fn decide_prefers_clean_stop_over_budget_escalation() {
        // Drained backlog at exhausted budget is a Stop, not an Escalate.
        let decision = Supervisor::decide(&observed(0, 0, 0, 20, 3600), &limits());
        assert!(matches!(decision, SupervisorDecision::Stop { .. }));
    }

    #[test]
    fn decide_stops_to_wait_on_pending_decisions() {
        let decision = Supervisor::decide(&observed(0, 2, 0, 5, 10), &limits());
        match decision {
            SupervisorDecision::Stop { reason } => {
                assert!(reason.contains("2 pending decision(s)"));
            }
            other => panic!("expected Stop, got {other:?}"),
        }
    }

    // --- end-to-end loop tests ---

    struct FixedExecutor {
        good: bool,
    }

    #[async_trait]
    impl TaskExecutor for FixedExecutor {
        async fn execute(&self, req: &TaskRequest) -> Result<TaskReport, ExecutorError> {
            if self.good {
                Ok(TaskReport {
                    summary: format!(
                        "Implemented {}: covered the empty input edge case and the \
                         boundary conditions with error handling, validated the \
                         output, and all tests pass after being manually checked.",
                        req.description
                    ),
                    artifact_refs: vec!["abc1234".into(), "def5678".into()],
                    claimed_done: true,
                })
            } else {
                Ok(TaskReport {
                    summary: "Partial attempt, placeholder only.".into(),
                    artifact_refs: vec![],
                    claimed_done: false,
                })
            }
        }
    }

    struct Fixture {
        backlog: Arc<BacklogStore>,
        memory: Arc<MemoryStore>,
        decisions: Arc<DecisionQueue>,
        checkpoints: Arc<CheckpointStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        Fixture {
            backlog: Arc::new(BacklogStore::open(dir.path()).unwrap()),
            memory: Arc::new(MemoryStore::open(dir.path(), 15).unwrap()),
            decisions: Arc::new(DecisionQueue::open(dir.path()).unwrap()),
            checkpoints: Arc::new(CheckpointStore::open(dir.path()).unwrap()),
            _dir: dir,
        }
    }

    fn supervisor(fx: &Fixture, good: bool, limits: SupervisorLimits, retry_cap: u32) -> Supervisor {
        let settings = CycleSettings {
            max_parallel: 1,
            retry_cap,
            claim_ttl_secs: 60,
            item_timeout: Duration::from_millis(200),
            base_delay_ms: 0,
            memory_min_score: 5,
            agent_type: "builder".into(),
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&fx.backlog),
            Arc::clone(&fx.memory),
            Arc::clone(&fx.decisions),
            QualityGate::new(18),
            Arc::new(FixedExecutor { good }),
            settings,
        );
        Supervisor::new(
            orchestrator,
            Arc::clone(&fx.backlog),
            Arc::clone(&fx.memory),
            Arc::clone(&fx.decisions),
            Arc::clone(&fx.checkpoints),
            limits,
            1,
        )
    }

    fn ready_item(fx: &Fixture, id: &str) {
        let item = WorkItem::new(
            id.into(),
            format!("build {id}"),
            "pricing".into(),
            Priority::P1,
            3,
            1,
        );
        fx.backlog.enqueue(item).unwrap();
        fx.backlog.transition(id, ItemStatus::Ready, "test").unwrap();
    }

    #[tokio::test]
    async fn run_until_done_drains_the_backlog() {
        let fx = fixture();
        ready_item(&fx, "A-001");
        ready_item(&fx, "B-001");
        ready_item(&fx, "C-001");
        let sup = supervisor(&fx, true, limits(), 0);

        let outcome = sup.run_until_done().await.unwrap();
        assert!(!outcome.escalated);
        assert!(outcome.reason.contains("backlog drained"));
        assert_eq!(outcome.cycles, 3); // phase size 1
        for id in ["A-001", "B-001", "C-001"] {
            assert_eq!(fx.backlog.get(id).unwrap().status, ItemStatus::Complete);
        }
        // The finished run was summarized into memory and discarded.
        assert!(fx.checkpoints.list_runs().unwrap().is_empty());
        let run_patterns = fx.memory.retrieve("run", "supervisor", 0).unwrap();
        assert_eq!(run_patterns.len(), 1);
        assert!(run_patterns[0].text.contains("completed"));
    }

    #[tokio::test]
    async fn repeated_failure_escalates_and_retains_the_run() {
        let fx = fixture();
        for id in ["A-001", "B-001", "C-001", "D-001"] {
            ready_item(&fx, id);
        }
        let mut l = limits();
        l.failure_cap = 2;
        let sup = supervisor(&fx, false, l, 0);

        let outcome = sup.run_until_done().await.unwrap();
        assert!(outcome.escalated);
        assert!(outcome.reason.contains("consecutive failure cap"));
        // The halted run is retained for resume.
        assert_eq!(fx.checkpoints.list_runs().unwrap().len(), 1);
        // The escalation entry is queued alongside the per-item ones.
        let pending = fx.decisions.pending().unwrap();
        assert!(pending.iter().any(|e| e.context.contains("supervised run halted")));
    }

    #[tokio::test]
    async fn cycle_budget_escalates_mid_run() {
        let fx = fixture();
        for id in ["A-001", "B-001", "C-001"] {
            ready_item(&fx, id);
        }
        let mut l = limits();
        l.max_cycles = 1;
        let sup = supervisor(&fx, true, l, 0);

        let outcome = sup.run_until_done().await.unwrap();
        assert!(outcome.escalated);
        assert!(outcome.reason.contains("cycle budget"));
        assert_eq!(outcome.cycles, 1);
    }

    #[tokio::test]
    async fn stop_signal_halts_before_work() {
        let fx = fixture();
        ready_item(&fx, "A-001");
        let sup = supervisor(&fx, true, limits(), 0);
        sup.stop_handle().store(true, Ordering::Relaxed);

        let outcome = sup.run_until_done().await.unwrap();
        assert!(!outcome.escalated);
        assert_eq!(outcome.reason, "stop signal received");
        assert_eq!(outcome.cycles, 0);
        assert_eq!(fx.backlog.get("A-001").unwrap().status, ItemStatus::Ready);
    }

    struct AlwaysVeto;

    impl ContinuationGuard for AlwaysVeto {
        fn allow_stop(&self, _observed: &ObservedState) -> bool {
            false
        }
    }

    // The cooperative guard is best-effort: even a guard that always
    // vetoes cannot keep the loop alive against the external check.
    #[tokio::test]
    async fn misfiring_guard_cannot_block_authoritative_stop() {
        let fx = fixture();
        let sup = supervisor(&fx, true, limits(), 0).with_guard(Box::new(AlwaysVeto));

        let outcome = sup.run_until_done().await.unwrap();
        assert!(!outcome.escalated);
        assert!(outcome.reason.contains("backlog drained"));
        assert_eq!(outcome.cycles, 0);
    }

    #[tokio::test]
    async fn resume_finishes_an_interrupted_run() {
        let fx = fixture();
        ready_item(&fx, "A-001");
        ready_item(&fx, "B-001");
        // A previous process planned the run and crashed before phase 1.
        fx.checkpoints
            .start_run("run-crashed", &[vec!["A-001".into()], vec!["B-001".into()]])
            .unwrap();
        fx.checkpoints.begin_phase("run-crashed", 0).unwrap();

        let sup = supervisor(&fx, true, limits(), 0);
        let outcome = sup.resume_run("run-crashed").await.unwrap();
        assert!(!outcome.escalated);
        assert_eq!(outcome.reason, "resumed run completed");
        assert_eq!(outcome.cycles, 2);
        assert_eq!(fx.backlog.get("A-001").unwrap().status, ItemStatus::Complete);
        assert_eq!(fx.backlog.get("B-001").unwrap().status, ItemStatus::Complete);
        assert!(fx.checkpoints.list_runs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn orchestrator_error_fails_the_phase_before_propagating() {
        let fx = fixture();
        // The phase plan names an item the backlog has never seen.
        fx.checkpoints
            .start_run("run-bad", &[vec!["GHOST-001".into()]])
            .unwrap();
        let sup = supervisor(&fx, true, limits(), 0);

        assert!(sup.resume_run("run-bad").await.is_err());
        let run = fx.checkpoints.load("run-bad").unwrap();
        assert_eq!(run.phases[0].status, PhaseStatus::Failed);
        // The failed phase is where a later resume picks up.
        assert_eq!(fx.checkpoints.resume("run-bad").unwrap(), Some(0));
    }

    #[tokio::test]
    async fn waiting_on_decisions_stops_cleanly() {
        let fx = fixture();
        ready_item(&fx, "A-001");
        let mut l = limits();
        l.failure_cap = 10; // keep the failure path from escalating first
        let sup = supervisor(&fx, false, l, 0);

        let outcome = sup.run_until_done().await.unwrap();
        assert!(!outcome.escalated);
        assert!(outcome.reason.contains("pending decision(s)"));
        // The item escalated into the queue instead of completing.
        assert_eq!(fx.backlog.get("A-001").unwrap().status, ItemStatus::WontFix);
        assert!(!fx.decisions.pending().unwrap().is_empty());
    }
}
