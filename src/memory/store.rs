//! Capacity-bounded learning memory with decay, reuse boost, and archival.
//!
//! Scores only change through the rules here: insert at baseline, +1 on
//! reuse, +2 on a second independent success, -1 per unreferenced decay
//! pass, clamped to [0, 10]. Patterns that decay to zero, and the lowest
//! scorers of an over-capacity bucket, move to the archive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ForemanError;

use super::archive::Archive;
use super::pattern::{BASELINE_SCORE, MemoryPattern, PatternKind, is_near_duplicate};

/// What `record` did with the incoming pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Boosted { score: u8, amount: u8 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecaySummary {
    pub decayed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryStats {
    pub active: usize,
    pub archived: usize,
}

#[derive(Serialize, Deserialize, Default)]
struct MemoryFile {
    patterns: Vec<MemoryPattern>,
    last_decay_at: Option<DateTime<Utc>>,
}

struct MemoryState {
    patterns: Vec<MemoryPattern>,
    last_decay_at: Option<DateTime<Utc>>,
    archive: Archive,
}

pub struct MemoryStore {
    inner: Mutex<MemoryState>,
    path: PathBuf,
    capacity: usize,
}

impl MemoryStore {
    /// Opens the store under `data_dir` with a per-bucket active cap.
    pub fn open(data_dir: &Path, capacity: usize) -> Result<Self, ForemanError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join("memory.json");
        let file: MemoryFile = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            MemoryFile::default()
        };
        let archive = Archive::open(&data_dir.join("archive.json"))?;
        Ok(Self {
            inner: Mutex::new(MemoryState {
                patterns: file.patterns,
                last_decay_at: file.last_decay_at,
                archive,
            }),
            path,
            capacity,
        })
    }

    /// Records a pattern: inserts at the baseline score when no
    /// near-duplicate exists in the bucket, otherwise boosts the existing
    /// entry (+2 for a success from a new source when the pattern already
    /// has independent sources, +1 otherwise).
    pub fn record(
        &self,
        kind: PatternKind,
        agent_type: &str,
        category: &str,
        text: &str,
        source: &str,
    ) -> Result<RecordOutcome, ForemanError> {
        let mut state = self.inner.lock().expect("memory lock poisoned");
        let existing = state.patterns.iter_mut().find(|p| {
            p.matches_bucket(category, agent_type) && is_near_duplicate(&p.text, text)
        });
        let outcome = match existing {
            Some(pattern) => {
                let independent = kind == PatternKind::Success
                    && !pattern.sources.iter().any(|s| s == source)
                    && !pattern.sources.is_empty();
                let amount = if independent { 2 } else { 1 };
                pattern.boost(amount);
                if !pattern.sources.iter().any(|s| s == source) {
                    pattern.sources.push(source.to_string());
                }
                debug!(pattern = %pattern.id, score = pattern.score, amount, "pattern boosted");
                RecordOutcome::Boosted {
                    score: pattern.score,
                    amount,
                }
            }
            None => {
                let pattern = MemoryPattern::new(
                    kind,
                    agent_type.to_string(),
                    category.to_string(),
                    text.to_string(),
                    source.to_string(),
                );
                debug!(pattern = %pattern.id, %category, %agent_type, "pattern recorded");
                state.patterns.push(pattern);
                RecordOutcome::Inserted
            }
        };
        self.persist(&state)?;
        Ok(outcome)
    }

    /// Active patterns for a bucket with `score >= min_score`, score
    /// descending, never more than the capacity cap. Returned patterns are
    /// touched as referenced.
    pub fn retrieve(
        &self,
        category: &str,
        agent_type: &str,
        min_score: u8,
    ) -> Result<Vec<MemoryPattern>, ForemanError> {
        let mut state = self.inner.lock().expect("memory lock poisoned");
        let now = Utc::now();
        let mut hits: Vec<&mut MemoryPattern> = state
            .patterns
            .iter_mut()
            .filter(|p| p.matches_bucket(category, agent_type) && p.score >= min_score)
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(self.capacity);
        let result: Vec<MemoryPattern> = hits
            .into_iter()
            .map(|p| {
                p.last_referenced = now;
                p.clone()
            })
            .collect();
        if !result.is_empty() {
            self.persist(&state)?;
        }
        Ok(result)
    }

    /// Scheduled maintenance: every pattern not referenced since the
    /// previous decay pass loses one point (floor 0); patterns at zero are
    /// archived and never retrieved again until restored.
    pub fn decay(&self) -> Result<DecaySummary, ForemanError> {
        let mut state = self.inner.lock().expect("memory lock poisoned");
        let since = state.last_decay_at;
        let mut summary = DecaySummary::default();
        for pattern in &mut state.patterns {
            let referenced_since_last = since.is_some_and(|t| pattern.last_referenced > t);
            if !referenced_since_last && pattern.score > 0 {
                pattern.score -= 1;
                summary.decayed += 1;
            }
        }
        // Drain the zero-score patterns into the archive.
        let mut kept = Vec::with_capacity(state.patterns.len());
        for pattern in std::mem::take(&mut state.patterns) {
            if pattern.score == 0 {
                summary.archived += 1;
                state.archive.push(pattern)?;
            } else {
                kept.push(pattern);
            }
        }
        state.patterns = kept;
        state.last_decay_at = Some(Utc::now());
        self.persist(&state)?;
        info!(decayed = summary.decayed, archived = summary.archived, "decay pass");
        Ok(summary)
    }

    /// Moves the lowest-scored entries (oldest reference on tie) of an
    /// over-capacity bucket to the archive until the bucket is back under
    /// cap. The cap is recomputed from the bucket, not tracked.
    pub fn evict_if_over_capacity(
        &self,
        category: &str,
        agent_type: &str,
    ) -> Result<usize, ForemanError> {
        let mut state = self.inner.lock().expect("memory lock poisoned");
        let mut evicted = 0;
        loop {
            let count = state
                .patterns
                .iter()
                .filter(|p| p.matches_bucket(category, agent_type))
                .count();
            if count <= self.capacity {
                break;
            }
            let victim = state
                .patterns
                .iter()
                .enumerate()
                .filter(|(_, p)| p.matches_bucket(category, agent_type))
                .min_by_key(|(_, p)| (p.score, p.last_referenced))
                .map(|(i, _)| i);
            let Some(index) = victim else { break };
            let pattern = state.patterns.remove(index);
            info!(pattern = %pattern.id, score = pattern.score, "evicted to archive");
            state.archive.push(pattern)?;
            evicted += 1;
        }
        if evicted > 0 {
            self.persist(&state)?;
        }
        Ok(evicted)
    }

    /// Re-inserts an archived pattern at the baseline score. External
    /// surface only; the orchestrator never restores.
    pub fn restore(&self, pattern_id: &str) -> Result<(), ForemanError> {
        let mut state = self.inner.lock().expect("memory lock poisoned");
        let mut pattern = state
            .archive
            .take(pattern_id)?
            .ok_or_else(|| ForemanError::PatternNotFound(pattern_id.to_string()))?;
        pattern.score = BASELINE_SCORE;
        pattern.last_referenced = Utc::now();
        info!(pattern = %pattern.id, "restored from archive");
        state.patterns.push(pattern);
        self.persist(&state)
    }

    /// Distinct (category, agent_type) buckets among active patterns, for
    /// the maintenance pass.
    pub fn buckets(&self) -> Vec<(String, String)> {
        let state = self.inner.lock().expect("memory lock poisoned");
        let mut buckets: Vec<(String, String)> = Vec::new();
        for pattern in &state.patterns {
            let key = (pattern.category.clone(), pattern.agent_type.clone());
            if !buckets.contains(&key) {
                buckets.push(key);
            }
        }
        buckets
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.inner.lock().expect("memory lock poisoned");
        MemoryStats {
            active: state.patterns.len(),
            archived: state.archive.len(),
        }
    }

    fn persist(&self, state: &MemoryState) -> Result<(), ForemanError> {
        let file = MemoryFile {
            patterns: state.patterns.clone(),
            last_decay_at: state.last_decay_at,
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
