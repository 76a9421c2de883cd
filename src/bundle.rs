//! The output of one pipeline run.
//!
//! A [`Bundle`] is immutable once built and shared behind an `Arc` between
//! the cache and every caller that asked for the same content.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DisplayLimits;
use crate::conflict::{Conflict, ConflictId, Severity};
use crate::correlation::{Correlation, Relation, StrengthBand};
use crate::input::EngineId;
use crate::resolution::Resolution;

/// Resolutions above this confidence count as high confidence in summaries.
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Correlations, conflicts and their resolutions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Pairwise correlations, in engine-id pair order.
    pub correlations: Vec<Correlation>,
    /// Detected conflicts.
    pub conflicts: Vec<Conflict>,
    /// One resolution per conflict, in conflict order.
    pub resolutions: Vec<Resolution>,
    /// Number of engine results supplied.
    pub engine_count: usize,
    /// Engines skipped because the engine limit was reached.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_engines: Vec<EngineId>,
}

impl Bundle {
    /// An empty bundle for `engine_count` engines.
    #[must_use]
    pub fn empty(engine_count: usize) -> Self {
        Self {
            engine_count,
            ..Self::default()
        }
    }

    /// Returns true when nothing was correlated or in conflict.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty() && self.conflicts.is_empty()
    }

    /// Returns true when some engines were skipped.
    #[must_use]
    pub fn truncated(&self) -> bool {
        !self.skipped_engines.is_empty()
    }

    /// The resolution of a conflict.
    #[must_use]
    pub fn resolution_for(&self, id: &ConflictId) -> Option<&Resolution> {
        self.resolutions.iter().find(|r| r.conflict_id == *id)
    }

    /// The correlation between two engines, in either order.
    #[must_use]
    pub fn correlation_between(&self, x: &EngineId, y: &EngineId) -> Option<&Correlation> {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        self.correlations.iter().find(|c| c.a == *a && c.b == *b)
    }

    /// One-paragraph summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.correlations.is_empty() {
            let band = |b: StrengthBand| self.correlations.iter().filter(|c| c.band == b).count();
            let relation =
                |r: Relation| self.correlations.iter().filter(|c| c.relation == r).count();
            parts.push(format!(
                "Found {} correlations: {} strong, {} moderate",
                self.correlations.len(),
                band(StrengthBand::Strong),
                band(StrengthBand::Moderate)
            ));
            parts.push(format!(
                "Results show {} confirmations and {} contradictions",
                relation(Relation::Confirms),
                relation(Relation::Contradicts)
            ));
        }

        if !self.conflicts.is_empty() {
            let critical = self
                .conflicts
                .iter()
                .filter(|c| c.severity == Severity::Critical)
                .count();
            parts.push(format!(
                "Identified {} conflicts, {critical} critical",
                self.conflicts.len()
            ));
        }

        if !self.resolutions.is_empty() {
            let high = self
                .resolutions
                .iter()
                .filter(|r| r.confidence > HIGH_CONFIDENCE)
                .count();
            parts.push(format!(
                "Resolved {} conflicts, {high} with high confidence",
                self.resolutions.len()
            ));
        }

        if parts.is_empty() {
            return "No significant correlations or conflicts detected".to_string();
        }
        parts.join("; ")
    }

    /// The top correlation, conflict and resolution lines.
    ///
    /// Correlations are ordered by strength, conflicts by severity; ties
    /// keep bundle order.
    #[must_use]
    pub fn render(&self, limits: &DisplayLimits) -> Vec<String> {
        let mut correlations: Vec<&Correlation> = self.correlations.iter().collect();
        correlations.sort_by(|x, y| y.strength.total_cmp(&x.strength));

        let mut conflicts: Vec<&Conflict> = self.conflicts.iter().collect();
        conflicts.sort_by(|x, y| y.severity.cmp(&x.severity));

        let shown: Vec<&Conflict> = conflicts.into_iter().take(limits.max_conflicts).collect();
        let resolutions = shown
            .iter()
            .filter_map(|c| self.resolution_for(&c.id))
            .take(limits.max_resolutions);

        correlations
            .into_iter()
            .take(limits.max_correlations)
            .map(ToString::to_string)
            .chain(shown.iter().map(ToString::to_string))
            .chain(resolutions.map(ToString::to_string))
            .collect()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
