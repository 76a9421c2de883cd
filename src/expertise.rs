//! Engine expertise weights.
//!
//! An expertise weight (0.0-1.0) states how much an engine should be
//! trusted within one domain category. The table is immutable once shared
//! with the pipeline; lookups fall back from the category weight to the
//! engine's reliability to the table default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::input::EngineId;
use crate::pattern::Category;

/// Weight used when nothing is known about an engine.
pub const DEFAULT_WEIGHT: f64 = 0.5;

/// Per-engine, per-category expertise weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertiseTable {
    #[serde(default)]
    weights: BTreeMap<EngineId, BTreeMap<Category, f64>>,
    #[serde(default)]
    reliability: BTreeMap<EngineId, f64>,
    #[serde(default = "default_weight")]
    default_weight: f64,
}

const fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

impl Default for ExpertiseTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ExpertiseTable {
    /// An empty table: every lookup yields the default weight.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            weights: BTreeMap::new(),
            reliability: BTreeMap::new(),
            default_weight: DEFAULT_WEIGHT,
        }
    }

    /// The shipped matrix for the standard analysis engines.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (engine, row) in BUILTIN {
            for (name, weight) in *row {
                let category = Category::parse_lenient(name);
                if category == Category::General {
                    continue;
                }
                // Synonyms fold onto one category; the strongest weight wins.
                let slot = table
                    .weights
                    .entry(EngineId::new(*engine))
                    .or_default()
                    .entry(category)
                    .or_insert(0.0);
                *slot = slot.max(*weight);
            }
        }
        table
    }

    /// Sets a category weight (clamped to [0, 1]).
    #[must_use]
    pub fn with_weight(mut self, engine: impl Into<EngineId>, category: Category, weight: f64) -> Self {
        self.set_weight(engine, category, weight);
        self
    }

    /// Sets an engine's category-independent reliability (clamped to [0, 1]).
    #[must_use]
    pub fn with_reliability(mut self, engine: impl Into<EngineId>, reliability: f64) -> Self {
        self.reliability
            .insert(engine.into(), reliability.clamp(0.0, 1.0));
        self
    }

    /// Sets the fallback weight (clamped to [0, 1]).
    #[must_use]
    pub fn with_default(mut self, weight: f64) -> Self {
        self.default_weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Sets a category weight in place (clamped to [0, 1]).
    pub fn set_weight(&mut self, engine: impl Into<EngineId>, category: Category, weight: f64) {
        self.weights
            .entry(engine.into())
            .or_default()
            .insert(category, weight.clamp(0.0, 1.0));
    }

    /// The weight explicitly configured for (engine, category), if any.
    #[must_use]
    pub fn explicit_weight(&self, engine: &EngineId, category: Category) -> Option<f64> {
        self.weights.get(engine)?.get(&category).copied()
    }

    /// Expertise of `engine` in `category`: the category weight, else the
    /// engine reliability, else the default.
    #[must_use]
    pub fn weight(&self, engine: &EngineId, category: Category) -> f64 {
        self.explicit_weight(engine, category)
            .unwrap_or_else(|| self.reliability(engine))
    }

    /// The engine's reliability, else the default.
    #[must_use]
    pub fn reliability(&self, engine: &EngineId) -> f64 {
        self.reliability
            .get(engine)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// The fallback weight.
    #[must_use]
    pub const fn default_weight(&self) -> f64 {
        self.default_weight
    }

    /// Checks every weight lies in [0, 1] (deserialized tables bypass clamping).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |v: f64| !(0.0..=1.0).contains(&v);
        for (engine, row) in &self.weights {
            if let Some(value) = row.values().copied().find(|v| out_of_range(*v)) {
                return Err(ConfigError::WeightOutOfRange {
                    engine: engine.to_string(),
                    value,
                });
            }
        }
        if let Some((engine, value)) = self.reliability.iter().find(|(_, v)| out_of_range(**v)) {
            return Err(ConfigError::WeightOutOfRange {
                engine: engine.to_string(),
                value: *value,
            });
        }
        if out_of_range(self.default_weight) {
            return Err(ConfigError::ThresholdOutOfRange {
                name: "default_weight",
                value: self.default_weight,
            });
        }
        Ok(())
    }
}

type Row = &'static [(&'static str, f64)];

const BUILTIN: &[(&str, Row)] = &[
    (
        "check_quality",
        &[
            ("security", 0.95),
            ("performance", 0.85),
            ("quality", 0.90),
            ("testing", 0.70),
            ("architecture", 0.60),
            ("database", 0.40),
            ("api", 0.50),
            ("dependencies", 0.50),
        ],
    ),
    (
        "analyze_code",
        &[
            ("architecture", 0.95),
            ("quality", 0.80),
            ("dependencies", 0.85),
            ("security", 0.60),
            ("performance", 0.50),
            ("database", 0.40),
            ("api", 0.50),
            ("testing", 0.60),
        ],
    ),
    (
        "performance_profiler",
        &[
            ("performance", 1.0),
            ("optimization", 0.95),
            ("bottlenecks", 0.90),
            ("quality", 0.40),
            ("security", 0.30),
            ("architecture", 0.50),
            ("database", 0.60),
            ("api", 0.40),
        ],
    ),
    (
        "analyze_test_coverage",
        &[
            ("testing", 1.0),
            ("quality", 0.85),
            ("coverage", 0.95),
            ("architecture", 0.40),
            ("security", 0.50),
            ("performance", 0.30),
            ("database", 0.30),
            ("api", 0.40),
        ],
    ),
    (
        "config_validator",
        &[
            ("configuration", 0.95),
            ("security", 0.85),
            ("deployment", 0.80),
            ("quality", 0.60),
            ("performance", 0.50),
            ("architecture", 0.50),
            ("database", 0.40),
            ("api", 0.40),
        ],
    ),
    (
        "analyze_database",
        &[
            ("database", 0.95),
            ("schema", 0.90),
            ("optimization", 0.85),
            ("architecture", 0.70),
            ("security", 0.60),
            ("performance", 0.70),
            ("quality", 0.50),
            ("api", 0.40),
        ],
    ),
    (
        "api_contract_checker",
        &[
            ("api", 0.95),
            ("contracts", 0.90),
            ("integration", 0.85),
            ("architecture", 0.70),
            ("quality", 0.65),
            ("security", 0.60),
            ("performance", 0.50),
            ("database", 0.40),
        ],
    ),
    (
        "map_dependencies",
        &[
            ("dependencies", 0.95),
            ("architecture", 0.85),
            ("coupling", 0.90),
            ("quality", 0.70),
            ("security", 0.50),
            ("performance", 0.40),
            ("database", 0.40),
            ("api", 0.50),
        ],
    ),
    (
        "interface_inconsistency_detector",
        &[
            ("consistency", 0.95),
            ("interfaces", 0.90),
            ("quality", 0.85),
            ("architecture", 0.75),
            ("testing", 0.60),
            ("security", 0.40),
            ("performance", 0.30),
            ("database", 0.30),
        ],
    ),
    (
        "analyze_logs",
        &[
            ("debugging", 0.90),
            ("performance", 0.70),
            ("errors", 0.85),
            ("security", 0.60),
            ("quality", 0.50),
            ("architecture", 0.40),
            ("database", 0.50),
            ("api", 0.50),
        ],
    ),
    (
        "search_code",
        &[
            ("patterns", 0.85),
            ("quality", 0.60),
            ("architecture", 0.50),
            ("security", 0.50),
            ("performance", 0.40),
            ("testing", 0.50),
            ("database", 0.40),
            ("api", 0.40),
        ],
    ),
    (
        "analyze_docs",
        &[
            ("documentation", 0.95),
            ("architecture", 0.70),
            ("quality", 0.60),
            ("api", 0.65),
            ("security", 0.40),
            ("performance", 0.30),
            ("database", 0.40),
            ("testing", 0.40),
        ],
    ),
];
