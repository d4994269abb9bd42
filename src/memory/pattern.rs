use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score given to newly recorded and restored patterns.
pub const BASELINE_SCORE: u8 = 5;

/// Upper clamp. Caps the influence any single pattern can have, so the
/// store represents recent, repeated success rather than one lucky outcome.
pub const MAX_SCORE: u8 = 10;

/// Whether a pattern records something that worked or something that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Success,
    Failure,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Success => write!(f, "success"),
            PatternKind::Failure => write!(f, "failure"),
        }
    }
}

/// A reusable learning with a decaying relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPattern {
    pub id: String,
    pub category: String,
    pub agent_type: String,
    pub text: String,
    /// Relevance, clamped to [0, MAX_SCORE]. Only the decay/boost rules
    /// change it.
    pub score: u8,
    pub kind: PatternKind,
    pub last_referenced: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Work-item ids that reinforced this pattern. Used to tell a second
    /// independent success apart from repeat reinforcement.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl MemoryPattern {
    pub fn new(
        kind: PatternKind,
        agent_type: String,
        category: String,
        text: String,
        source: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            category,
            agent_type,
            text,
            score: BASELINE_SCORE,
            kind,
            last_referenced: now,
            created_at: now,
            sources: vec![source],
        }
    }

    /// Raises the score by `amount`, clamped to MAX_SCORE.
    pub fn boost(&mut self, amount: u8) {
        self.score = (self.score + amount).min(MAX_SCORE);
        self.last_referenced = Utc::now();
    }

    pub fn matches_bucket(&self, category: &str, agent_type: &str) -> bool {
        self.category == category && self.agent_type == agent_type
    }
}

/// Lowercased, whitespace-collapsed form used for duplicate detection.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Two texts are near-duplicates when their normalized forms are equal or
/// very close under Jaro-Winkler.
pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    a == b || strsim::jaro_winkler(&a, &b) >= 0.92
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pattern_starts_at_baseline() {
        let p = MemoryPattern::new(
            PatternKind::Success,
            "builder".into(),
            "pricing".into(),
            "Use the cached rate table for quote floors".into(),
            "PRICING-001".into(),
        );
        assert_eq!(p.score, BASELINE_SCORE);
        assert_eq!(p.sources, vec!["PRICING-001".to_string()]);
    }

    #[test]
    fn boost_clamps_at_max() {
        let mut p = MemoryPattern::new(
            PatternKind::Success,
            "builder".into(),
            "pricing".into(),
            "text".into(),
            "X-001".into(),
        );
        p.boost(4);
        assert_eq!(p.score, 9);
        p.boost(4);
        assert_eq!(p.score, MAX_SCORE);
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("  Use   Cached\tPricing "),
            "use cached pricing"
        );
    }

    #[test]
    fn near_duplicate_detection() {
        assert!(is_near_duplicate(
            "Use the cached rate table",
            "use  the cached RATE table"
        ));
        assert!(is_near_duplicate(
            "Validate quote inputs before pricing",
            "Validate quote inputs before pricing runs"
        ));
        assert!(!is_near_duplicate(
            "Use the cached rate table",
            "Escalate all refund requests to review"
        ));
    }

    #[test]
    fn pattern_serialization_roundtrip() {
        let p = MemoryPattern::new(
            PatternKind::Failure,
            "builder".into(),
            "email".into(),
            "Template lookups fail on empty locale".into(),
            "EMAIL-003".into(),
        );
        let json = serde_json::to_string(&p).unwrap();
        let parsed: MemoryPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, p.id);
        assert_eq!(parsed.kind, PatternKind::Failure);
        assert_eq!(parsed.score, BASELINE_SCORE);
    }
}
