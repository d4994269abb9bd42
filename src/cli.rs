//! Command-line interface, built on clap.
//!
//! Subcommands cover the operational entry points: manual intake, a single
//! cycle, a supervised run, resume, status, memory maintenance, and
//! decision resolution. Global flags override the configuration file.

use clap::{Parser, Subcommand, ValueEnum};

use crate::backlog::Priority;

/// Foreman: autonomous backlog orchestrator with quality gating.
#[derive(Debug, Parser)]
#[command(name = "foreman", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Data directory holding durable state (overrides foreman.toml).
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Maximum items dispatched concurrently per cycle.
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Enable verbose (debug-level) logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Priority accepted on the command line, mapped to [`Priority`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    P0,
    P1,
    P2,
    P3,
}

// clap renders the default value through Display; keep it parseable.
impl std::fmt::Display for PriorityArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityArg::P0 => write!(f, "p0"),
            PriorityArg::P1 => write!(f, "p1"),
            PriorityArg::P2 => write!(f, "p2"),
            PriorityArg::P3 => write!(f, "p3"),
        }
    }
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::P0 => Priority::P0,
            PriorityArg::P1 => Priority::P1,
            PriorityArg::P2 => Priority::P2,
            PriorityArg::P3 => Priority::P3,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a work item to the backlog.
    Add {
        /// Short imperative title for the item.
        title: String,

        /// Category tag used for memory retrieval and id prefixing.
        #[arg(long)]
        category: String,

        #[arg(long, value_enum, default_value_t = PriorityArg::P2)]
        priority: PriorityArg,

        /// Ordinal impact, 1 to 5.
        #[arg(long, default_value_t = 3)]
        impact: u8,

        /// Ordinal effort, 1 to 5.
        #[arg(long, default_value_t = 2)]
        effort: u8,

        /// Item ids that must be deployed before this one is actionable.
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,

        /// Promote straight to READY instead of leaving it DISCOVERED.
        #[arg(long, default_value_t = false)]
        ready: bool,
    },

    /// Run one orchestrator cycle to completion.
    Cycle,

    /// Run supervised cycles until the backlog is done or a budget trips.
    Run {
        /// Override the configured cycle budget.
        #[arg(long)]
        max_cycles: Option<u32>,
    },

    /// Resume an interrupted checkpointed run.
    Resume { run_id: String },

    /// Show backlog and memory summary statistics.
    Status,

    /// Force a memory maintenance pass (decay + eviction).
    Maintain,

    /// Resolve a pending decision-queue entry.
    Decide {
        /// Decision entry id.
        id: String,

        /// Chosen option label (or free-form resolution).
        #[arg(long)]
        choice: String,

        /// Also reset the related work item back to READY.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },

    /// Restore an archived memory pattern at the baseline score.
    Restore {
        /// Archived pattern id.
        pattern_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_add_subcommand() {
        let cli = Cli::parse_from([
            "foreman",
            "add",
            "Recalculate quote floors",
            "--category",
            "pricing",
            "--impact",
            "4",
            "--effort",
            "2",
            "--depends-on",
            "UI-001",
            "--ready",
        ]);
        match cli.command {
            Command::Add {
                title,
                category,
                impact,
                effort,
                depends_on,
                ready,
                ..
            } => {
                assert_eq!(title, "Recalculate quote floors");
                assert_eq!(category, "pricing");
                assert_eq!(impact, 4);
                assert_eq!(effort, 2);
                assert_eq!(depends_on, vec!["UI-001".to_string()]);
                assert!(ready);
            }
            _ => panic!("expected Add command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "foreman",
            "--data-dir",
            "/tmp/state",
            "--max-parallel",
            "5",
            "--verbose",
            "cycle",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/state"));
        assert_eq!(cli.max_parallel, Some(5));
        assert!(matches!(cli.command, Command::Cycle));
    }

    #[test]
    fn cli_parses_run_with_budget_override() {
        let cli = Cli::parse_from(["foreman", "run", "--max-cycles", "4"]);
        match cli.command {
            Command::Run { max_cycles } => assert_eq!(max_cycles, Some(4)),
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_decide_subcommand() {
        let cli = Cli::parse_from([
            "foreman", "decide", "abc-123", "--choice", "reset", "--reset",
        ]);
        match cli.command {
            Command::Decide { id, choice, reset } => {
                assert_eq!(id, "abc-123");
                assert_eq!(choice, "reset");
                assert!(reset);
            }
            _ => panic!("expected Decide command"),
        }
    }

    #[test]
    fn priority_arg_maps_to_priority() {
        assert_eq!(Priority::from(PriorityArg::P0), Priority::P0);
        assert_eq!(Priority::from(PriorityArg::P3), Priority::P3);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
