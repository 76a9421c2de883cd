//! Static configuration for the correlation pipeline.
//!
//! A [`CorrelationConfig`] is built once (defaults, serde, or environment
//! overrides), validated, and then shared read-only behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::conflict::ConflictType;
use crate::error::ConfigError;
use crate::expertise::ExpertiseTable;
use crate::input::EngineId;
use crate::pattern::Category;
use crate::resolution::Strategy;

/// Weights of the four similarity components.
///
/// Only components defined for a pair take part; the weights of the
/// present components are renormalized to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    /// Finding-text similarity.
    pub text: f64,
    /// Category Jaccard.
    pub category: f64,
    /// Shared-metric agreement.
    pub metric: f64,
    /// Finding-key Jaccard.
    pub keys: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            text: 0.35,
            category: 0.2,
            metric: 0.2,
            keys: 0.25,
        }
    }
}

/// How many items each section of a rendered summary shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLimits {
    /// Correlation lines.
    pub max_correlations: usize,
    /// Conflict lines.
    pub max_conflicts: usize,
    /// Resolution lines.
    pub max_resolutions: usize,
}

impl Default for DisplayLimits {
    fn default() -> Self {
        Self {
            max_correlations: 5,
            max_conflicts: 3,
            max_resolutions: 3,
        }
    }
}

/// Engine priority used by the hierarchical strategy (first = highest).
pub const DEFAULT_PRIORITY: &[&str] = &[
    "review_output",
    "full_analysis",
    "check_quality",
    "analyze_code",
    "validate",
    "analyze_test_coverage",
    "performance_profiler",
    "config_validator",
    "analyze_database",
    "api_contract_checker",
    "map_dependencies",
    "interface_inconsistency_detector",
    "analyze_logs",
    "search_code",
];

/// Pipeline, cache and runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Minimum strength for a correlation to be materialized.
    pub similarity_threshold: f64,
    /// Lower bound of the moderate strength band.
    pub moderate_threshold: f64,
    /// Similarity at which a pair confirms; lower bound of the strong band.
    pub strong_threshold: f64,
    /// Minimum normalized-Levenshtein ratio for two findings to match.
    pub finding_match_threshold: f64,
    /// Number of leading normalized chars compared when a side has no findings.
    pub text_compare_chars: usize,
    /// Similarity component weights.
    pub weights: SimilarityWeights,

    /// Relative gap beyond which two metric values conflict.
    pub metric_discrepancy_threshold: f64,
    /// Categories whose conflicts are always critical.
    pub critical_categories: BTreeSet<Category>,
    /// Emit metric_discrepancy conflicts.
    pub detect_metric_conflicts: bool,
    /// Emit recommendation_conflict conflicts.
    pub detect_recommendation_conflicts: bool,
    /// Minimum subject Jaccard for two recommendations to collide.
    pub subject_overlap_threshold: f64,

    /// Expertise weights per engine and category.
    pub expertise: ExpertiseTable,
    /// Hierarchical strategy order (first = highest).
    pub priority: Vec<EngineId>,
    /// Per-conflict-type strategy replacing the selector default.
    pub strategy_overrides: BTreeMap<ConflictType, Strategy>,
    /// Confidence a composite step must exceed to be accepted.
    pub acceptance_threshold: f64,
    /// Confidence reported by manual review.
    pub manual_review_confidence: f64,
    /// Relative tolerance under which consensus groups two numbers.
    pub consensus_tolerance: f64,

    /// At most this many engines are correlated per call.
    pub max_engines: usize,

    /// Whether bundles are memoized.
    pub cache_enabled: bool,
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,
    /// Maximum cache entries.
    pub cache_capacity: usize,

    /// Worker threads (clamped to 1-4 by the runtime).
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
    /// Deadline for one pipeline run, in milliseconds.
    pub pipeline_timeout_ms: u64,

    /// Summary display limits.
    pub display: DisplayLimits,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            moderate_threshold: 0.5,
            strong_threshold: 0.8,
            finding_match_threshold: 0.6,
            text_compare_chars: 500,
            weights: SimilarityWeights::default(),
            metric_discrepancy_threshold: 0.3,
            critical_categories: BTreeSet::from([Category::Security]),
            detect_metric_conflicts: true,
            detect_recommendation_conflicts: true,
            subject_overlap_threshold: 0.3,
            expertise: ExpertiseTable::builtin(),
            priority: DEFAULT_PRIORITY.iter().map(|e| EngineId::new(*e)).collect(),
            strategy_overrides: BTreeMap::new(),
            acceptance_threshold: 0.6,
            manual_review_confidence: 0.3,
            consensus_tolerance: 0.1,
            max_engines: 10,
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_capacity: 100,
            workers: 2,
            queue_capacity: 64,
            pipeline_timeout_ms: 30_000,
            display: DisplayLimits::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse::<T>().ok();
    if parsed.is_none() {
        warn!(key, value = raw, "ignoring unparseable environment override");
    }
    parsed
}

impl CorrelationConfig {
    /// Cache entry lifetime.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Deadline for one pipeline run.
    #[must_use]
    pub const fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }

    /// Defaults overridden from the process environment, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_vars(std::env::vars())
    }

    /// Defaults overridden from the given `(name, value)` pairs, then validated.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::default().with_env_vars(vars)
    }

    /// Applies recognized environment overrides and validates the result.
    ///
    /// Unparseable values are ignored with a warning; unknown variables are
    /// ignored silently.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, raw) = (key.as_ref(), value.as_ref());
            match key {
                "CORRELATION_SIMILARITY_THRESHOLD" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.similarity_threshold = v;
                    }
                }
                "CORRELATION_STRONG_THRESHOLD" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.strong_threshold = v;
                    }
                }
                "CORRELATION_MODERATE_THRESHOLD" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.moderate_threshold = v;
                    }
                }
                "METRIC_DISCREPANCY_THRESHOLD" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.metric_discrepancy_threshold = v;
                    }
                }
                "CORRELATION_CACHE_TTL" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.cache_ttl_secs = v;
                    }
                }
                "CORRELATION_CACHE_MAX_ENTRIES" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.cache_capacity = v;
                    }
                }
                "CORRELATION_ACCEPTANCE_THRESHOLD" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.acceptance_threshold = v;
                    }
                }
                "CORRELATION_WORKERS" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.workers = v;
                    }
                }
                "CORRELATION_PIPELINE_TIMEOUT_MS" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.pipeline_timeout_ms = v;
                    }
                }
                "CORRELATION_MAX_ENGINES" => {
                    if let Some(v) = parse_env(key, raw) {
                        self.max_engines = v;
                    }
                }
                "ENABLE_CORRELATION_CACHE" => {
                    self.cache_enabled = matches!(
                        raw.trim().to_ascii_lowercase().as_str(),
                        "true" | "1" | "yes" | "on"
                    );
                }
                "PREFERRED_RESOLUTION_STRATEGIES" => {
                    let chain = preferred_chain(raw);
                    if chain.is_empty() {
                        warn!(key, value = raw, "no usable strategy names in override");
                    } else {
                        self.strategy_overrides
                            .insert(ConflictType::ContradictoryResult, Strategy::Composite { chain });
                    }
                }
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks ranges, orderings and the expertise table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("similarity_threshold", self.similarity_threshold),
            ("moderate_threshold", self.moderate_threshold),
            ("strong_threshold", self.strong_threshold),
            ("finding_match_threshold", self.finding_match_threshold),
            ("subject_overlap_threshold", self.subject_overlap_threshold),
            ("acceptance_threshold", self.acceptance_threshold),
            ("manual_review_confidence", self.manual_review_confidence),
            ("consensus_tolerance", self.consensus_tolerance),
            ("weights.text", self.weights.text),
            ("weights.category", self.weights.category),
            ("weights.metric", self.weights.metric),
            ("weights.keys", self.weights.keys),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if !(self.metric_discrepancy_threshold.is_finite() && self.metric_discrepancy_threshold > 0.0) {
            return Err(ConfigError::MustBePositive {
                field: "metric_discrepancy_threshold",
            });
        }

        let w = self.weights;
        if w.text + w.category + w.metric + w.keys <= 0.0 {
            return Err(ConfigError::ZeroSimilarityWeights);
        }

        if self.similarity_threshold > self.moderate_threshold
            || self.moderate_threshold > self.strong_threshold
        {
            return Err(ConfigError::InvalidOrdering {
                reason: format!(
                    "expected similarity ({}) <= moderate ({}) <= strong ({})",
                    self.similarity_threshold, self.moderate_threshold, self.strong_threshold
                ),
            });
        }

        let positive = [
            ("max_engines", self.max_engines),
            ("cache_capacity", self.cache_capacity),
            ("workers", self.workers),
            ("queue_capacity", self.queue_capacity),
            ("text_compare_chars", self.text_compare_chars),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive { field });
            }
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::MustBePositive {
                field: "cache_ttl_secs",
            });
        }
        if self.pipeline_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                field: "pipeline_timeout_ms",
            });
        }

        self.expertise.validate()
    }
}

/// Parses a comma list of strategy names into a composite chain.
///
/// `composite` and unknown names are skipped; duplicates keep their first
/// position.
fn preferred_chain(raw: &str) -> Vec<Strategy> {
    let mut chain: Vec<Strategy> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse::<Strategy>() {
            Ok(Strategy::Composite { .. }) => {}
            Ok(strategy) => {
                if !chain.contains(&strategy) {
                    chain.push(strategy);
                }
            }
            Err(err) => warn!(error = %err, "skipping strategy name"),
        }
    }
    chain
}
