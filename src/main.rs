mod backlog;
mod checkpoint;
mod cli;
mod config;
mod decisions;
mod error;
mod executor;
mod gate;
mod memory;
mod orchestrator;
mod supervisor;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use console::Style;

use crate::backlog::{BacklogStore, ItemStatus, WorkItem};
use crate::checkpoint::CheckpointStore;
use crate::cli::{Cli, Command};
use crate::config::ForemanConfig;
use crate::decisions::DecisionQueue;
use crate::executor::{HttpExecutor, StubExecutor, TaskExecutor};
use crate::gate::QualityGate;
use crate::memory::MemoryStore;
use crate::orchestrator::{CycleSettings, Orchestrator};
use crate::supervisor::{Supervisor, SupervisorLimits};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ForemanConfig::load()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(max_parallel) = cli.max_parallel {
        config.orchestrator.max_parallel = max_parallel;
    }

    let data_dir = PathBuf::from(&config.data_dir);
    let backlog = Arc::new(BacklogStore::open(&data_dir)?);
    let memory = Arc::new(MemoryStore::open(&data_dir, config.memory.capacity)?);
    let decisions = Arc::new(DecisionQueue::open(&data_dir)?);
    let checkpoints = Arc::new(CheckpointStore::open(&data_dir)?);

    match cli.command {
        Command::Add {
            title,
            category,
            priority,
            impact,
            effort,
            depends_on,
            ready,
        } => {
            let id = backlog.allocate_id(&category);
            let item = WorkItem::new(
                id.clone(),
                title,
                category,
                priority.into(),
                impact,
                effort,
            )
            .with_dependencies(depends_on);
            backlog.enqueue(item)?;
            if ready {
                backlog.transition(&id, ItemStatus::Ready, "intake")?;
            }
            println!(
                "  {} added {id} ({})",
                Style::new().green().apply_to("✓"),
                if ready { "READY" } else { "DISCOVERED" }
            );
        }

        Command::Cycle => {
            let orchestrator = build_orchestrator(&config, &backlog, &memory, &decisions);
            let progress = ui::CycleProgress::start("dispatching ready items");
            let report = orchestrator.run_cycle(None, None).await?;
            progress.finish(&report);
            if cli.verbose {
                progress.print_report(&report);
            }
        }

        Command::Run { max_cycles } => {
            if let Some(max_cycles) = max_cycles {
                config.supervisor.max_cycles = max_cycles;
            }
            let supervisor = build_supervisor(
                &config,
                &backlog,
                &memory,
                &decisions,
                &checkpoints,
            );
            wire_ctrl_c(&supervisor);
            let outcome = supervisor.run_until_done().await?;
            ui::print_outcome(&outcome);
        }

        Command::Resume { run_id } => {
            let supervisor = build_supervisor(
                &config,
                &backlog,
                &memory,
                &decisions,
                &checkpoints,
            );
            wire_ctrl_c(&supervisor);
            let outcome = supervisor.resume_run(&run_id).await?;
            ui::print_outcome(&outcome);
        }

        Command::Status => {
            ui::print_status(
                &backlog.stats(),
                &memory.stats(),
                decisions.pending()?.len(),
                &checkpoints.list_runs()?,
                &backlog.audit_tail(8)?,
            );
        }

        Command::Maintain => {
            let summary = memory.decay()?;
            let mut evicted = 0;
            for (category, agent_type) in memory.buckets() {
                evicted += memory.evict_if_over_capacity(&category, &agent_type)?;
            }
            println!(
                "  {} decayed {}, archived {}, evicted {}",
                Style::new().green().apply_to("✓"),
                summary.decayed,
                summary.archived,
                evicted
            );
        }

        Command::Decide { id, choice, reset } => {
            let entry = decisions.resolve(&id, &choice)?;
            if reset && let Some(item_id) = &entry.item_id {
                backlog.reset(item_id, "reviewer")?;
                println!(
                    "  {} {item_id} reset to READY",
                    Style::new().yellow().apply_to("↻")
                );
            }
            println!(
                "  {} decision {id} resolved: {choice}",
                Style::new().green().apply_to("✓")
            );
        }

        Command::Restore { pattern_id } => {
            memory.restore(&pattern_id)?;
            println!(
                "  {} pattern {pattern_id} restored at baseline score",
                Style::new().green().apply_to("✓")
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "foreman=debug" } else { "foreman=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// The executor pool is remote when an endpoint is configured, otherwise the
// offline stub drives the pipeline.
fn build_task_executor(config: &ForemanConfig) -> Arc<dyn TaskExecutor> {
    if config.executor.endpoint.is_empty() {
        Arc::new(StubExecutor)
    } else {
        let token = if config.executor.token.is_empty() {
            None
        } else {
            Some(config.executor.token.clone())
        };
        Arc::new(HttpExecutor::new(config.executor.endpoint.clone(), token))
    }
}

fn build_orchestrator(
    config: &ForemanConfig,
    backlog: &Arc<BacklogStore>,
    memory: &Arc<MemoryStore>,
    decisions: &Arc<DecisionQueue>,
) -> Orchestrator {
    Orchestrator::new(
        Arc::clone(backlog),
        Arc::clone(memory),
        Arc::clone(decisions),
        QualityGate::new(config.gate.threshold),
        build_task_executor(config),
        CycleSettings::from_config(config),
    )
}

fn build_supervisor(
    config: &ForemanConfig,
    backlog: &Arc<BacklogStore>,
    memory: &Arc<MemoryStore>,
    decisions: &Arc<DecisionQueue>,
    checkpoints: &Arc<CheckpointStore>,
) -> Supervisor {
    Supervisor::new(
        build_orchestrator(config, backlog, memory, decisions),
        Arc::clone(backlog),
        Arc::clone(memory),
        Arc::clone(decisions),
        Arc::clone(checkpoints),
        SupervisorLimits::from_config(config),
        config.orchestrator.max_parallel,
    )
}

fn wire_ctrl_c(supervisor: &Supervisor) {
    let stop = supervisor.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stop signal received; finishing the current phase");
            stop.store(true, Ordering::Relaxed);
        }
    });
}
