mod archive;
mod pattern;
mod store;

pub use archive::{Archive, ArchiveEntry};
pub use pattern::{BASELINE_SCORE, MAX_SCORE, MemoryPattern, PatternKind};
pub use store::{DecaySummary, MemoryStats, MemoryStore, RecordOutcome};
