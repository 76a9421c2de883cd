//! Pairwise relationships between engines' extracted patterns.
//!
//! A [`Correlation`] is stored once per unordered engine pair with `a < b`.

mod detector;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::input::EngineId;
use crate::pattern::{Category, Finding};

pub use detector::CorrelationDetector;

/// Kind of relationship between two engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// The engines report substantially the same thing.
    Confirms,
    /// The engines cover overlapping ground with different detail.
    Complements,
    /// The engines make incompatible claims.
    Contradicts,
}

impl Relation {
    /// Returns a short stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirms => "confirms",
            Self::Complements => "complements",
            Self::Contradicts => "contradicts",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength band of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthBand {
    /// Below the moderate threshold.
    Weak,
    /// Between the moderate and strong thresholds.
    Moderate,
    /// At or above the strong threshold.
    Strong,
}

impl StrengthBand {
    /// Band of `strength` given the moderate and strong lower bounds.
    #[must_use]
    pub fn of(strength: f64, moderate: f64, strong: f64) -> Self {
        if strength >= strong {
            Self::Strong
        } else if strength >= moderate {
            Self::Moderate
        } else {
            Self::Weak
        }
    }

    /// Returns a short stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        }
    }
}

impl fmt::Display for StrengthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two findings (one per engine) whose texts match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingMatch {
    /// Finding text on the `a` side.
    pub a: String,
    /// Finding text on the `b` side.
    pub b: String,
    /// Normalized Levenshtein ratio.
    pub similarity: f64,
}

/// An explicit disagreement between the two engines of a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contradiction {
    /// Opposite-polarity findings in the same category.
    Polarity {
        /// Shared category.
        category: Category,
        /// Finding from engine `a`.
        a: Finding,
        /// Finding from engine `b`.
        b: Finding,
        /// 1.0 for a blanket clear claim, else the key similarity.
        magnitude: f64,
    },

    /// A shared metric whose relative gap exceeds the discrepancy threshold.
    Metric {
        /// Metric name.
        name: String,
        /// Value reported by `a`.
        a: f64,
        /// Value reported by `b`.
        b: f64,
        /// Relative gap.
        gap: f64,
    },
}

impl Contradiction {
    /// Contradiction magnitude in [0, 1].
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        match self {
            Self::Polarity { magnitude, .. } => magnitude.clamp(0.0, 1.0),
            Self::Metric { gap, .. } => gap.clamp(0.0, 1.0),
        }
    }
}

/// What a correlation is based on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Matched finding pairs.
    pub matched_findings: Vec<FindingMatch>,
    /// Metric names both engines report.
    pub shared_metrics: Vec<String>,
    /// Categories both engines touch.
    pub shared_categories: BTreeSet<Category>,
    /// Explicit contradictions.
    pub contradictions: Vec<Contradiction>,
}

impl Evidence {
    /// Evidence volume: matched findings + shared metrics + contradictions.
    #[must_use]
    pub fn volume(&self) -> usize {
        self.matched_findings.len() + self.shared_metrics.len() + self.contradictions.len()
    }
}

/// Relationship between two engines' outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Lower engine id.
    pub a: EngineId,
    /// Higher engine id.
    pub b: EngineId,
    /// Kind of relationship.
    pub relation: Relation,
    /// Strength in [0, 1].
    pub strength: f64,
    /// Confidence in [0, 1], driven by evidence volume.
    pub confidence: f64,
    /// Strength band.
    pub band: StrengthBand,
    /// Weighted similarity before classification.
    pub similarity: f64,
    /// Supporting evidence.
    pub evidence: Evidence,
}

impl Correlation {
    /// Returns true if `engine` is one side of the pair.
    #[must_use]
    pub fn involves(&self, engine: &EngineId) -> bool {
        self.a == *engine || self.b == *engine
    }

    /// The pair as a tuple `(a, b)`.
    #[must_use]
    pub fn pair(&self) -> (&EngineId, &EngineId) {
        (&self.a, &self.b)
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({}, confidence {:.2})",
            self.a, self.relation, self.b, self.band, self.confidence
        )
    }
}

/// Correlation confidence from evidence volume: `min(1, 0.3 + 0.2 n)`.
#[must_use]
pub fn evidence_confidence(volume: usize) -> f64 {
    (0.3 + 0.2 * volume as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(StrengthBand::of(0.85, 0.5, 0.8), StrengthBand::Strong);
        assert_eq!(StrengthBand::of(0.6, 0.5, 0.8), StrengthBand::Moderate);
        assert_eq!(StrengthBand::of(0.3, 0.5, 0.8), StrengthBand::Weak);
    }

    #[test]
    fn confidence_grows_with_evidence_and_saturates() {
        assert!((evidence_confidence(0) - 0.3).abs() < 1e-9);
        assert!((evidence_confidence(2) - 0.7).abs() < 1e-9);
        assert_eq!(evidence_confidence(10), 1.0);
    }

    #[test]
    fn display_reads_as_sentence() {
        let c = Correlation {
            a: EngineId::new("engine_x"),
            b: EngineId::new("engine_y"),
            relation: Relation::Confirms,
            strength: 0.9,
            confidence: 0.85,
            band: StrengthBand::Strong,
            similarity: 0.9,
            evidence: Evidence::default(),
        };
        assert_eq!(
            c.to_string(),
            "engine_x confirms engine_y (strong, confidence 0.85)"
        );
    }
}
