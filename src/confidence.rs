//! Multi-factor trust score for one engine result.
//!
//! The score is a weighted sum of five factors, each clamped to [0, 1].
//! The weights sum to one, so the total is bounded to [0, 1] as well.

use serde::{Deserialize, Serialize};

use crate::expertise::ExpertiseTable;
use crate::pattern::{Category, EnginePattern};

/// Weight of content completeness.
pub const COMPLETENESS_WEIGHT: f64 = 0.30;
/// Weight of payload structure.
pub const STRUCTURE_WEIGHT: f64 = 0.20;
/// Weight of extracted findings.
pub const FINDINGS_WEIGHT: f64 = 0.20;
/// Weight of extracted metrics.
pub const METRICS_WEIGHT: f64 = 0.15;
/// Weight of engine reliability.
pub const RELIABILITY_WEIGHT: f64 = 0.15;

/// The individual factors behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    /// Saturating function of content length.
    pub completeness: f64,
    /// Structured payloads score above free text.
    pub structure: f64,
    /// `min(1, findings / 5)`.
    pub findings: f64,
    /// `min(1, metrics / 5)`.
    pub metrics: f64,
    /// Expertise for the category, else engine reliability, else the default.
    pub reliability: f64,
}

impl ScoreFactors {
    /// Weighted total in [0, 1].
    #[must_use]
    pub fn total(&self) -> f64 {
        let sum = COMPLETENESS_WEIGHT * self.completeness.clamp(0.0, 1.0)
            + STRUCTURE_WEIGHT * self.structure.clamp(0.0, 1.0)
            + FINDINGS_WEIGHT * self.findings.clamp(0.0, 1.0)
            + METRICS_WEIGHT * self.metrics.clamp(0.0, 1.0)
            + RELIABILITY_WEIGHT * self.reliability.clamp(0.0, 1.0);
        sum.clamp(0.0, 1.0)
    }
}

/// Scores engine results against an expertise table.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer<'a> {
    expertise: &'a ExpertiseTable,
}

impl<'a> ConfidenceScorer<'a> {
    /// Create a scorer.
    #[must_use]
    pub const fn new(expertise: &'a ExpertiseTable) -> Self {
        Self { expertise }
    }

    /// Factor breakdown for `pattern` in the context of `category`.
    #[must_use]
    pub fn factors(&self, pattern: &EnginePattern, category: Category) -> ScoreFactors {
        ScoreFactors {
            completeness: completeness(pattern.content_len),
            structure: structure(pattern),
            findings: saturating_count(pattern.findings.len()),
            metrics: saturating_count(pattern.metrics.len()),
            reliability: self.expertise.weight(&pattern.engine, category),
        }
    }

    /// Score in [0, 1].
    #[must_use]
    pub fn score(&self, pattern: &EnginePattern, category: Category) -> f64 {
        self.factors(pattern, category).total()
    }
}

fn completeness(len: usize) -> f64 {
    match len {
        0 => 0.0,
        n if n > 1000 => 1.0,
        n if n > 500 => 0.8,
        n if n > 100 => 0.6,
        _ => 0.3,
    }
}

fn structure(pattern: &EnginePattern) -> f64 {
    if pattern.structured && pattern.field_count > 2 {
        0.9
    } else if pattern.structured {
        0.7
    } else if pattern.multiline {
        0.5
    } else {
        0.3
    }
}

fn saturating_count(count: usize) -> f64 {
    (count as f64 / 5.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::EngineId;

    #[test]
    fn empty_pattern_scores_reliability_and_structure_only() {
        let table = ExpertiseTable::empty();
        let pattern = EnginePattern::empty(EngineId::new("a"));
        let factors = ConfidenceScorer::new(&table).factors(&pattern, Category::Security);
        assert_eq!(factors.completeness, 0.0);
        assert_eq!(factors.structure, 0.3);
        assert!((factors.total() - (0.2 * 0.3 + 0.15 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn rich_structured_result_scores_high() {
        let table = ExpertiseTable::empty().with_weight("a", Category::Security, 1.0);
        let mut pattern = EnginePattern::empty(EngineId::new("a"));
        pattern.content_len = 2000;
        pattern.structured = true;
        pattern.field_count = 4;
        let score = ConfidenceScorer::new(&table).score(&pattern, Category::Security);
        assert!((score - (0.30 + 0.2 * 0.9 + 0.15)).abs() < 1e-9);
    }

    #[test]
    fn completeness_saturates() {
        assert_eq!(completeness(50), 0.3);
        assert_eq!(completeness(101), 0.6);
        assert_eq!(completeness(501), 0.8);
        assert_eq!(completeness(5000), 1.0);
    }

    #[test]
    fn counts_saturate_at_five() {
        assert_eq!(saturating_count(10), 1.0);
        assert!((saturating_count(2) - 0.4).abs() < 1e-9);
    }
}
