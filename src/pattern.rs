//! Extracted patterns: the normalized view of one engine result.
//!
//! Every downstream component (detector, identifier, scorer) works on
//! [`EnginePattern`]s, never on raw payloads.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::input::EngineId;

/// Domain category a finding, recommendation or expertise weight belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Quality,
    Testing,
    Architecture,
    Database,
    Api,
    Dependencies,
    Configuration,
    Documentation,
    General,
}

impl Category {
    /// All non-general categories, in vocabulary order.
    pub const DOMAINS: [Self; 10] = [
        Self::Security,
        Self::Performance,
        Self::Quality,
        Self::Testing,
        Self::Architecture,
        Self::Database,
        Self::Api,
        Self::Dependencies,
        Self::Configuration,
        Self::Documentation,
    ];

    /// Returns a short stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Quality => "quality",
            Self::Testing => "testing",
            Self::Architecture => "architecture",
            Self::Database => "database",
            Self::Api => "api",
            Self::Dependencies => "dependencies",
            Self::Configuration => "configuration",
            Self::Documentation => "documentation",
            Self::General => "general",
        }
    }

    /// Parses a category name, accepting common synonyms.
    ///
    /// Unknown names map to [`Category::General`].
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "security" | "vulnerability" | "vulnerabilities" | "auth" => Self::Security,
            "performance" | "optimization" | "bottlenecks" | "latency" | "speed" => {
                Self::Performance
            }
            "quality" | "maintainability" | "consistency" | "interfaces" | "style" => {
                Self::Quality
            }
            "testing" | "tests" | "coverage" => Self::Testing,
            "architecture" | "design" | "structure" | "patterns" => Self::Architecture,
            "database" | "schema" | "sql" => Self::Database,
            "api" | "contracts" | "integration" => Self::Api,
            "dependencies" | "coupling" | "deps" => Self::Dependencies,
            "configuration" | "config" | "deployment" => Self::Configuration,
            "documentation" | "docs" => Self::Documentation,
            _ => Self::General,
        }
    }

    /// Two categories are compatible when equal or when either is general.
    #[must_use]
    pub fn is_compatible(self, other: Self) -> bool {
        self == other || self == Self::General || other == Self::General
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

/// Whether a finding asserts that a problem exists or that none does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// An issue is present ("SQL injection in login handler").
    Problem,
    /// No issue / healthy state ("no security issues found").
    Clear,
}

impl Polarity {
    /// Returns true when the two polarities disagree.
    #[must_use]
    pub fn opposes(self, other: Self) -> bool {
        self != other
    }
}

/// Severity label attached to a finding by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FindingSeverity {
    /// Parses a severity label; unknown labels yield `None`.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "info" | "minor" => Some(Self::Low),
            "medium" | "moderate" | "warning" => Some(Self::Medium),
            "high" | "major" | "error" | "severe" => Some(Self::High),
            "critical" | "blocker" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Atomic classified claim extracted from an engine result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Domain of the claim.
    pub category: Category,
    /// Original text of the unit.
    pub text: String,
    /// Engine that made the claim.
    pub source: EngineId,
    /// Problem vs. clear.
    pub polarity: Polarity,
    /// Engine-reported severity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<FindingSeverity>,
    /// Normalized key: lowercase content tokens with polarity words removed.
    pub key: String,
}

/// Numeric measurement reported by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Canonical metric name (e.g. `coverage`, `latency`).
    pub name: String,
    /// Value in the canonical unit.
    pub value: f64,
    /// Canonical unit, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Engine that reported it.
    pub source: EngineId,
}

/// Suggested action extracted from an engine result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Domain of the advice.
    pub category: Category,
    /// Original text.
    pub text: String,
    /// Engine that gave the advice.
    pub source: EngineId,
    /// Leading action word from the opposing-action vocabulary, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Content tokens describing what the action applies to.
    pub subject: BTreeSet<String>,
}

/// Everything extracted from one engine result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnginePattern {
    /// Source engine.
    pub engine: EngineId,
    /// Classified claims.
    pub findings: Vec<Finding>,
    /// Metrics keyed by canonical name.
    pub metrics: BTreeMap<String, Metric>,
    /// Suggested actions.
    pub recommendations: Vec<Recommendation>,
    /// Domains the result touches.
    pub categories: BTreeSet<Category>,
    /// Normalized text (lowercase, whitespace-collapsed) of the whole payload.
    pub text: String,
    /// Length in chars of the raw content.
    pub content_len: usize,
    /// Whether the payload was pre-structured.
    pub structured: bool,
    /// Number of top-level structured fields (0 for text).
    pub field_count: usize,
    /// Whether the text contained more than one line.
    pub multiline: bool,
}

impl EnginePattern {
    /// Creates an empty pattern for an engine.
    #[must_use]
    pub fn empty(engine: EngineId) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    /// Returns true when nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
            && self.metrics.is_empty()
            && self.recommendations.is_empty()
            && self.categories.is_empty()
    }

    /// Finding keys as a set.
    #[must_use]
    pub fn finding_keys(&self) -> BTreeSet<&str> {
        self.findings.iter().map(|f| f.key.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_synonyms_resolve() {
        assert_eq!(Category::parse_lenient("Coverage"), Category::Testing);
        assert_eq!(Category::parse_lenient("schema"), Category::Database);
        assert_eq!(Category::parse_lenient("optimization"), Category::Performance);
        assert_eq!(Category::parse_lenient("no-such-thing"), Category::General);
    }

    #[test]
    fn general_is_compatible_with_everything() {
        assert!(Category::General.is_compatible(Category::Security));
        assert!(Category::Security.is_compatible(Category::Security));
        assert!(!Category::Security.is_compatible(Category::Testing));
    }

    #[test]
    fn severity_labels_parse() {
        assert_eq!(FindingSeverity::parse("HIGH"), Some(FindingSeverity::High));
        assert_eq!(FindingSeverity::parse("blocker"), Some(FindingSeverity::Critical));
        assert_eq!(FindingSeverity::parse("??"), None);
    }

    #[test]
    fn empty_pattern_is_empty() {
        let p = EnginePattern::empty(EngineId::new("a"));
        assert!(p.is_empty());
        assert_eq!(p.engine.as_str(), "a");
    }
}
