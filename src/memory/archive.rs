//! Archive for patterns evicted from the active memory store.
//!
//! Archived entries never surface in retrieval, but they remain restorable:
//! an external actor can re-insert one at the baseline score.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ForemanError;

use super::pattern::MemoryPattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub pattern: MemoryPattern,
    pub archived_at: DateTime<Utc>,
    pub restorable: bool,
}

pub struct Archive {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    pub fn open(path: &Path) -> Result<Self, ForemanError> {
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn push(&mut self, pattern: MemoryPattern) -> Result<(), ForemanError> {
        self.entries.push(ArchiveEntry {
            pattern,
            archived_at: Utc::now(),
            restorable: true,
        });
        self.persist()
    }

    /// Removes and returns a restorable pattern by id.
    pub fn take(&mut self, pattern_id: &str) -> Result<Option<MemoryPattern>, ForemanError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.pattern.id == pattern_id && e.restorable);
        match pos {
            Some(pos) => {
                let entry = self.entries.remove(pos);
                self.persist()?;
                Ok(Some(entry.pattern))
            }
            None => Ok(None),
        }
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), ForemanError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
