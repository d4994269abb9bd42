//! Terminal output: spinners and colored summaries.
//!
//! Uses `indicatif` for progress spinners and `console` for styling.
//! [`CycleProgress`] tracks one orchestrator cycle visually; the free
//! functions render status and run summaries.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::backlog::BacklogStats;
use crate::memory::MemoryStats;
use crate::orchestrator::{CycleReport, Disposition};
use crate::supervisor::RunOutcome;

/// Spinner shown while a cycle is in flight, with colored result lines.
pub struct CycleProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl CycleProgress {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Clears the spinner and prints the per-item outcomes.
    pub fn finish(&self, report: &CycleReport) {
        self.pb.finish_and_clear();
        for outcome in &report.outcomes {
            match outcome.disposition {
                Disposition::Completed => println!(
                    "  {} {} completed ({} attempt(s), gate {}/25)",
                    self.green.apply_to("✓"),
                    outcome.item_id,
                    outcome.attempts,
                    outcome.gate_total.unwrap_or(0)
                ),
                Disposition::Escalated => println!(
                    "  {} {} escalated after {} attempt(s)",
                    self.red.apply_to("✗"),
                    outcome.item_id,
                    outcome.attempts
                ),
                Disposition::Skipped => println!(
                    "  {} {} skipped (claimed elsewhere)",
                    self.yellow.apply_to("↷"),
                    outcome.item_id
                ),
            }
        }
        println!(
            "  {} attempted, {} passed, {} failed, {} ready remain",
            report.attempted, report.passed, report.failed, report.remaining_ready
        );
    }

    /// Prints the full cycle report as pretty JSON.
    pub fn print_report(&self, report: &CycleReport) {
        println!();
        println!("{}", self.green.apply_to("─── Cycle Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}

/// Backlog and memory summary for `foreman status`.
pub fn print_status(
    backlog: &BacklogStats,
    memory: &MemoryStats,
    pending_decisions: usize,
    retained_runs: &[String],
    audit_tail: &[String],
) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Backlog"));
    println!(
        "  discovered {}  ready {}  in-progress {}  complete {}  deployed {}  wont-fix {}",
        backlog.discovered,
        backlog.ready,
        backlog.in_progress,
        backlog.complete,
        backlog.deployed,
        backlog.wont_fix
    );
    println!("  actionable now: {}", backlog.actionable);
    println!("{}", bold.apply_to("Memory"));
    println!(
        "  active patterns {}  archived {}",
        memory.active, memory.archived
    );
    println!("{}", bold.apply_to("Escalations"));
    println!("  pending decisions: {pending_decisions}");
    if !retained_runs.is_empty() {
        println!("{}", bold.apply_to("Retained runs (resumable)"));
        for run in retained_runs {
            println!("  {run}");
        }
    }
    if !audit_tail.is_empty() {
        println!("{}", bold.apply_to("Recent audit records"));
        for record in audit_tail {
            println!("  {record}");
        }
    }
}

/// Final line for a supervised run: reason first, never a bare exit.
pub fn print_outcome(outcome: &RunOutcome) {
    let style = if outcome.escalated {
        Style::new().red().bold()
    } else {
        Style::new().green().bold()
    };
    println!();
    println!(
        "{} after {} cycle(s): {}",
        style.apply_to(if outcome.escalated {
            "Escalated"
        } else {
            "Stopped"
        }),
        outcome.cycles,
        outcome.reason
    );
}
