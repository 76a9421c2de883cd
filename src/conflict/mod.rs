//! Conflict types.
//!
//! Conflicts are explicit objects, not hidden errors. Each one keeps the
//! engines that disagree and the value each of them reported.

mod identifier;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::input::EngineId;
use crate::pattern::{Category, Polarity};

pub use identifier::ConflictIdentifier;

/// Deterministic identifier for a conflict.
///
/// Derived from the conflict's type, category, subject and engines, so the
/// same disagreement always gets the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Derives the id of a conflict.
    #[must_use]
    pub fn derive(
        conflict_type: ConflictType,
        category: Category,
        subject: &str,
        engines: &[EngineId],
    ) -> Self {
        let engines: Vec<&str> = engines.iter().map(EngineId::as_str).collect();
        let name = format!(
            "{}|{}|{}|{}",
            conflict_type.as_str(),
            category.as_str(),
            subject,
            engines.join(",")
        );
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Opposite-polarity findings in the same category.
    ContradictoryResult,
    /// The same metric reported with values too far apart.
    MetricDiscrepancy,
    /// Mutually exclusive recommended actions on the same subject.
    RecommendationConflict,
}

impl ConflictType {
    /// Returns a short stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ContradictoryResult => "contradictory_result",
            Self::MetricDiscrepancy => "metric_discrepancy",
            Self::RecommendationConflict => "recommendation_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a conflict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Gap within the base threshold.
    Minor,
    /// Gap beyond the base threshold.
    Moderate,
    /// Gap beyond twice the base threshold, or a critical category.
    Critical,
}

impl Severity {
    /// Classifies a gap against the base threshold.
    #[must_use]
    pub fn classify(
        gap: f64,
        base_threshold: f64,
        category: Category,
        critical_categories: &BTreeSet<Category>,
    ) -> Self {
        if gap > 2.0 * base_threshold || critical_categories.contains(&category) {
            Self::Critical
        } else if gap > base_threshold {
            Self::Moderate
        } else {
            Self::Minor
        }
    }

    /// Returns a short stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value one engine contributed to a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictValue {
    /// A metric reading.
    Metric {
        /// Value in the canonical unit.
        value: f64,
        /// Canonical unit, if known.
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// A classified finding.
    Finding {
        /// Finding text.
        text: String,
        /// Problem vs. clear.
        polarity: Polarity,
    },
    /// A recommended action.
    Recommendation {
        /// Recommendation text.
        text: String,
        /// Action word, if recognized.
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
}

impl ConflictValue {
    /// Numeric value, for metric readings.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Metric { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Lowercase, whitespace-collapsed comparison key.
    #[must_use]
    pub fn comparison_key(&self) -> String {
        match self {
            Self::Metric { value, .. } => value.to_string(),
            Self::Finding { polarity, .. } => match polarity {
                Polarity::Problem => "problem".to_string(),
                Polarity::Clear => "clear".to_string(),
            },
            Self::Recommendation { text, action } => action
                .clone()
                .unwrap_or_else(|| crate::extract::normalize(text)),
        }
    }
}

impl fmt::Display for ConflictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric { value, unit: Some(unit) } => write!(f, "{value}{unit}"),
            Self::Metric { value, unit: None } => write!(f, "{value}"),
            Self::Finding { text, .. } | Self::Recommendation { text, .. } => f.write_str(text),
        }
    }
}

/// A detected disagreement between engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Deterministic identifier.
    pub id: ConflictId,
    /// Kind of disagreement.
    pub conflict_type: ConflictType,
    /// Severity.
    pub severity: Severity,
    /// Domain of the disagreement.
    pub category: Category,
    /// Metric name, finding key or recommendation subject.
    pub subject: String,
    /// Participating engines, ascending.
    pub engines: Vec<EngineId>,
    /// What each engine reported.
    pub values: BTreeMap<EngineId, ConflictValue>,
    /// Gap magnitude the severity was derived from.
    pub gap: f64,
}

impl Conflict {
    /// Returns true if `engine` participates.
    #[must_use]
    pub fn involves(&self, engine: &EngineId) -> bool {
        self.values.contains_key(engine)
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engines: Vec<&str> = self.engines.iter().map(EngineId::as_str).collect();
        write!(
            f,
            "Conflict ({}): {} among {{{}}}",
            self.severity,
            self.conflict_type,
            engines.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let engines = [EngineId::new("a"), EngineId::new("b")];
        let x = ConflictId::derive(ConflictType::MetricDiscrepancy, Category::Testing, "coverage", &engines);
        let y = ConflictId::derive(ConflictType::MetricDiscrepancy, Category::Testing, "coverage", &engines);
        let z = ConflictId::derive(ConflictType::MetricDiscrepancy, Category::Testing, "latency", &engines);
        assert_eq!(x, y);
        assert_ne!(x, z);
    }

    #[test]
    fn severity_thresholds() {
        let critical = BTreeSet::from([Category::Security]);
        assert_eq!(Severity::classify(0.72, 0.3, Category::Testing, &critical), Severity::Critical);
        assert_eq!(Severity::classify(0.4, 0.3, Category::Testing, &critical), Severity::Moderate);
        assert_eq!(Severity::classify(0.1, 0.3, Category::Testing, &critical), Severity::Minor);
        assert_eq!(Severity::classify(0.1, 0.3, Category::Security, &critical), Severity::Critical);
    }

    #[test]
    fn display_lists_engines() {
        let engines = vec![EngineId::new("a"), EngineId::new("b"), EngineId::new("c")];
        let conflict = Conflict {
            id: ConflictId::derive(ConflictType::MetricDiscrepancy, Category::Testing, "coverage", &engines),
            conflict_type: ConflictType::MetricDiscrepancy,
            severity: Severity::Moderate,
            category: Category::Testing,
            subject: "coverage".to_string(),
            engines,
            values: BTreeMap::new(),
            gap: 0.4,
        };
        assert_eq!(
            conflict.to_string(),
            "Conflict (moderate): metric_discrepancy among {a, b, c}"
        );
    }
}
