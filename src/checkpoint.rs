//! Durable checkpoint log for multi-phase runs.
//!
//! Each run is one append-only, pipe-delimited file under `runs/`. Every
//! write is flushed and fsynced before the call returns (write-ahead
//! semantics): a phase transition is not visible to a resuming process
//! until its triggering record is durable. A crash between `begin_phase`
//! and `complete_phase` leaves the phase Active, and `resume` points back
//! at it, so phase bodies must be idempotent or check prior effects.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::ForemanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Done,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "PENDING"),
            PhaseStatus::Active => write!(f, "ACTIVE"),
            PhaseStatus::Done => write!(f, "DONE"),
            PhaseStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One phase of a run: the items assigned to it and what it produced.
#[derive(Debug, Clone, Serialize)]
pub struct Phase {
    pub index: usize,
    pub status: PhaseStatus,
    pub assigned_items: Vec<String>,
    pub artifact_refs: Vec<String>,
    pub fail_reason: Option<String>,
}

/// In-memory view of a run, rebuilt by replaying its log.
#[derive(Debug, Clone, Serialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub phases: Vec<Phase>,
    pub last_updated: DateTime<Utc>,
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(data_dir: &Path) -> Result<Self, ForemanError> {
        let dir = data_dir.join("runs");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.log"))
    }

    /// Creates a run with its phase plan. Each entry in `phases` is the
    /// list of item ids assigned to that phase, in execution order.
    pub fn start_run(&self, run_id: &str, phases: &[Vec<String>]) -> Result<(), ForemanError> {
        let path = self.run_path(run_id);
        if path.exists() {
            return Err(ForemanError::DuplicateRun(run_id.to_string()));
        }
        let mut lines = format!("run|{}|{}\n", run_id, Utc::now().to_rfc3339());
        for (index, items) in phases.iter().enumerate() {
            lines.push_str(&format!(
                "phase|{}|{}|{}\n",
                index,
                items.join(","),
                Utc::now().to_rfc3339()
            ));
        }
        self.append_durable(&path, &lines)?;
        info!(run = %run_id, phases = phases.len(), "run started");
        Ok(())
    }

    /// Marks a phase Active. Fails with `PhaseOrder` unless every earlier
    /// phase is Done. Re-beginning an Active or Failed phase is allowed;
    /// that is exactly the crash-recovery path.
    pub fn begin_phase(&self, run_id: &str, index: usize) -> Result<(), ForemanError> {
        let run = self.load(run_id)?;
        let phase = phase_at(&run, index)?;
        if let Some(blocking) = run.phases[..index].iter().find(|p| p.status != PhaseStatus::Done)
        {
            return Err(ForemanError::PhaseOrder {
                run: run_id.to_string(),
                reason: format!(
                    "cannot begin phase {index}: phase {} is {}",
                    blocking.index, blocking.status
                ),
            });
        }
        if phase.status == PhaseStatus::Done {
            return Err(ForemanError::PhaseOrder {
                run: run_id.to_string(),
                reason: format!("phase {index} is already DONE"),
            });
        }
        self.append_durable(
            &self.run_path(run_id),
            &format!("begin|{}|{}\n", index, Utc::now().to_rfc3339()),
        )?;
        info!(run = %run_id, phase = index, "phase begun");
        Ok(())
    }

    /// Marks an Active phase Done, recording what it produced.
    pub fn complete_phase(
        &self,
        run_id: &str,
        index: usize,
        artifact_refs: &[String],
    ) -> Result<(), ForemanError> {
        let run = self.load(run_id)?;
        let phase = phase_at(&run, index)?;
        if phase.status != PhaseStatus::Active {
            return Err(ForemanError::PhaseOrder {
                run: run_id.to_string(),
                reason: format!("cannot complete phase {index} in status {}", phase.status),
            });
        }
        self.append_durable(
            &self.run_path(run_id),
            &format!(
                "complete|{}|{}|{}\n",
                index,
                artifact_refs.join(","),
                Utc::now().to_rfc3339()
            ),
        )?;
        info!(run = %run_id, phase = index, artifacts = artifact_refs.len(), "phase complete");
        Ok(())
    }

    /// Marks an Active phase Failed with a reason.
    pub fn fail_phase(&self, run_id: &str, index: usize, reason: &str) -> Result<(), ForemanError> {
        let run = self.load(run_id)?;
        let phase = phase_at(&run, index)?;
        if phase.status != PhaseStatus::Active {
            return Err(ForemanError::PhaseOrder {
                run: run_id.to_string(),
                reason: format!("cannot fail phase {index} in status {}", phase.status),
            });
        }
        // The reason shares the record's field separator; keep it one field.
        let reason = reason.replace('|', "/");
        self.append_durable(
            &self.run_path(run_id),
            &format!("fail|{}|{}|{}\n", index, reason, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    /// First non-Done phase index, or None when every phase is Done.
    pub fn resume(&self, run_id: &str) -> Result<Option<usize>, ForemanError> {
        let run = self.load(run_id)?;
        Ok(run.phases.iter().find(|p| p.status != PhaseStatus::Done).map(|p| p.index))
    }

    /// Rebuilds the run state by replaying its log.
    pub fn load(&self, run_id: &str) -> Result<RunCheckpoint, ForemanError> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(ForemanError::RunNotFound(run_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let mut phases: Vec<Phase> = Vec::new();
        let mut last_updated = Utc::now();
        for line in content.lines() {
            let parts: Vec<&str> = line.split('|').collect();
            match parts.as_slice() {
                ["run", _, ts] => {
                    last_updated = parse_ts(ts);
                }
                ["phase", index, items, ts] => {
                    phases.push(Phase {
                        index: index.parse().unwrap_or(phases.len()),
                        status: PhaseStatus::Pending,
                        assigned_items: split_csv(items),
                        artifact_refs: Vec::new(),
                        fail_reason: None,
                    });
                    last_updated = parse_ts(ts);
                }
                ["begin", index, ts] => {
                    if let Some(phase) = lookup(&mut phases, index) {
                        phase.status = PhaseStatus::Active;
                        phase.fail_reason = None;
                    }
                    last_updated = parse_ts(ts);
                }
                ["complete", index, artifacts, ts] => {
                    if let Some(phase) = lookup(&mut phases, index) {
                        phase.status = PhaseStatus::Done;
                        phase.artifact_refs = split_csv(artifacts);
                    }
                    last_updated = parse_ts(ts);
                }
                ["fail", index, reason, ts] => {
                    if let Some(phase) = lookup(&mut phases, index) {
                        phase.status = PhaseStatus::Failed;
                        phase.fail_reason = Some((*reason).to_string());
                    }
                    last_updated = parse_ts(ts);
                }
                _ => {}
            }
        }
        Ok(RunCheckpoint {
            run_id: run_id.to_string(),
            phases,
            last_updated,
        })
    }

    /// Verifies every phase is Done, returns a one-line run summary, and
    /// discards the log. The caller records the summary into memory.
    pub fn finish_run(&self, run_id: &str) -> Result<String, ForemanError> {
        let run = self.load(run_id)?;
        if let Some(open) = run.phases.iter().find(|p| p.status != PhaseStatus::Done) {
            return Err(ForemanError::PhaseOrder {
                run: run_id.to_string(),
                reason: format!("cannot finish: phase {} is {}", open.index, open.status),
            });
        }
        let items: usize = run.phases.iter().map(|p| p.assigned_items.len()).sum();
        let artifacts: usize = run.phases.iter().map(|p| p.artifact_refs.len()).sum();
        let summary = format!(
            "run {} completed: {} phases, {} items, {} artifacts",
            run_id,
            run.phases.len(),
            items,
            artifacts
        );
        fs::remove_file(self.run_path(run_id))?;
        info!(run = %run_id, "run finished and discarded");
        Ok(summary)
    }

    /// Ids of runs that are still retained (not yet finished).
    pub fn list_runs(&self) -> Result<Vec<String>, ForemanError> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "log")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                runs.push(stem.to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }

    // Append, flush, fsync. The record is durable before we return.
    fn append_durable(&self, path: &Path, record: &str) -> Result<(), ForemanError> {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

fn phase_at<'a>(run: &'a RunCheckpoint, index: usize) -> Result<&'a Phase, ForemanError> {
    run.phases.get(index).ok_or_else(|| ForemanError::PhaseOrder {
        run: run.run_id.clone(),
        reason: format!("phase {index} does not exist"),
    })
}

fn lookup<'a>(phases: &'a mut [Phase], index: &str) -> Option<&'a mut Phase> {
    let index: usize = index.parse().ok()?;
    phases.iter_mut().find(|p| p.index == index)
}

fn split_csv(field: &str) -> Vec<String> {
    if field.is_empty() {
        Vec::new()
    } else {
        field.split(',').map(str::to_string).collect()
    }
}

fn parse_ts(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
