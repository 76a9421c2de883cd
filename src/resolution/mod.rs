//! Conflict resolution.
//!
//! Strategies are pure: the same conflict and context always produce the
//! same resolution. Every conflict gets exactly one [`Resolution`]; manual
//! review is the fallback that always succeeds.

mod selector;
mod strategies;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CorrelationConfig;
use crate::confidence::ConfidenceScorer;
use crate::conflict::{Conflict, ConflictId, ConflictValue};
use crate::error::{ConfigError, CorrelateResult};
use crate::input::EngineId;
use crate::pattern::{Category, EnginePattern};
use crate::pipeline::Deadline;

pub use selector::StrategySelector;

/// A resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Strategy {
    /// Largest group of agreeing values wins.
    Consensus,

    /// Engine with the highest expertise for the conflict category wins.
    ExpertWeighting,

    /// Engine with the highest result confidence wins.
    ConfidenceBased,

    /// Engine ranked highest in the configured priority order wins.
    Hierarchical,

    /// First member whose confidence exceeds the acceptance threshold.
    ///
    /// Falls through to manual review when none qualifies.
    Composite {
        /// Strategies tried in order.
        chain: Vec<Strategy>,
    },

    /// Leaves the conflict unresolved with every candidate value.
    ManualReview,
}

impl Strategy {
    /// The default chain for contradictory results.
    #[must_use]
    pub fn default_chain() -> Vec<Self> {
        vec![Self::ExpertWeighting, Self::ConfidenceBased, Self::Consensus]
    }

    /// Returns a short stable identifier suitable for logging/debugging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Consensus => "consensus",
            Self::ExpertWeighting => "expert_weighting",
            Self::ConfidenceBased => "confidence_based",
            Self::Hierarchical => "hierarchical",
            Self::Composite { .. } => "composite",
            Self::ManualReview => "manual_review",
        }
    }

    /// Applies the strategy. `None` when it cannot decide (no participants).
    #[must_use]
    pub fn apply(&self, conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Option<StrategyOutcome> {
        match self {
            Self::Consensus => strategies::consensus(conflict, ctx),
            Self::ExpertWeighting => strategies::expert_weighting(conflict, ctx),
            Self::ConfidenceBased => strategies::confidence_based(conflict, ctx),
            Self::Hierarchical => strategies::hierarchical(conflict, ctx),
            Self::Composite { chain } => Some(strategies::composite(chain, conflict, ctx)),
            Self::ManualReview => Some(strategies::manual_review(conflict, ctx)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consensus" | "majority" => Ok(Self::Consensus),
            "expert" | "expert_weighting" | "expert_weighted" => Ok(Self::ExpertWeighting),
            "confidence" | "confidence_based" => Ok(Self::ConfidenceBased),
            "hierarchy" | "hierarchical" => Ok(Self::Hierarchical),
            "composite" => Ok(Self::Composite {
                chain: Self::default_chain(),
            }),
            "manual" | "manual_review" => Ok(Self::ManualReview),
            other => Err(ConfigError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

/// The answer a resolution settles on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedValue {
    /// One engine's value was chosen.
    Chosen {
        /// The engine whose value was chosen.
        engine: EngineId,
        /// The chosen value.
        value: ConflictValue,
    },

    /// No value was chosen; every candidate is kept for review.
    Unresolved {
        /// Each participant's value.
        candidates: BTreeMap<EngineId, ConflictValue>,
    },
}

/// What a single strategy decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    /// Name of the strategy that decided.
    pub strategy: String,
    /// Resolved value.
    pub value: ResolvedValue,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Human-readable rationale.
    pub rationale: String,
    /// Engines whose value agrees with the answer.
    pub supporting: Vec<EngineId>,
    /// Engines whose value disagrees.
    pub dissenting: Vec<EngineId>,
}

/// The resolved answer for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The conflict this resolves.
    pub conflict_id: ConflictId,
    /// Strategy that produced the answer.
    pub strategy: String,
    /// Strategies tried before it (composite only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted: Vec<String>,
    /// Resolved value.
    pub value: ResolvedValue,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Human-readable rationale.
    pub rationale: String,
    /// Engines agreeing with the answer.
    pub supporting: Vec<EngineId>,
    /// Engines disagreeing with the answer.
    pub dissenting: Vec<EngineId>,
}

impl Resolution {
    /// Returns true if a value was chosen.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self.value, ResolvedValue::Chosen { .. })
    }

    /// The engine whose value was chosen, if any.
    #[must_use]
    pub fn chosen_engine(&self) -> Option<&EngineId> {
        match &self.value {
            ResolvedValue::Chosen { engine, .. } => Some(engine),
            ResolvedValue::Unresolved { .. } => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resolved via {}: {}", self.strategy, self.rationale)
    }
}

/// Everything strategies may consult: configuration and per-engine patterns.
#[derive(Debug, Clone)]
pub struct ResolutionContext<'a> {
    config: &'a CorrelationConfig,
    patterns: BTreeMap<&'a EngineId, &'a EnginePattern>,
}

impl<'a> ResolutionContext<'a> {
    /// Create a context over the patterns of one pipeline run.
    #[must_use]
    pub fn new(config: &'a CorrelationConfig, patterns: &'a [EnginePattern]) -> Self {
        Self {
            config,
            patterns: patterns.iter().map(|p| (&p.engine, p)).collect(),
        }
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &'a CorrelationConfig {
        self.config
    }

    /// Expertise weight of `engine` for `category`.
    #[must_use]
    pub fn expertise(&self, engine: &EngineId, category: Category) -> f64 {
        self.config.expertise.weight(engine, category)
    }

    /// Confidence Scorer output for `engine` in the context of `category`.
    ///
    /// Engines without a pattern score as an empty result.
    #[must_use]
    pub fn score(&self, engine: &EngineId, category: Category) -> f64 {
        let scorer = ConfidenceScorer::new(&self.config.expertise);
        match self.patterns.get(engine) {
            Some(pattern) => scorer.score(pattern, category),
            None => scorer.score(&EnginePattern::empty(engine.clone()), category),
        }
    }

    /// Position of `engine` in the priority order (0 = highest).
    #[must_use]
    pub fn rank(&self, engine: &EngineId) -> Option<usize> {
        self.config.priority.iter().position(|e| e == engine)
    }
}

/// Resolves conflicts using the selector's strategy per conflict type.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionEngine<'a> {
    selector: StrategySelector<'a>,
}

impl<'a> ResolutionEngine<'a> {
    /// Create an engine over a configuration.
    #[must_use]
    pub const fn new(config: &'a CorrelationConfig) -> Self {
        Self {
            selector: StrategySelector::new(config),
        }
    }

    /// Resolves one conflict. Never fails.
    #[must_use]
    pub fn resolve(&self, conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Resolution {
        let strategy = self.selector.select(conflict.conflict_type);
        let outcome = strategy
            .apply(conflict, ctx)
            .unwrap_or_else(|| strategies::manual_review(conflict, ctx));
        let attempted = match &strategy {
            Strategy::Composite { chain } => chain
                .iter()
                .map(|s| s.name().to_string())
                .take_while(|name| *name != outcome.strategy)
                .collect(),
            _ => Vec::new(),
        };
        debug!(
            conflict = %conflict.id,
            strategy = %outcome.strategy,
            confidence = outcome.confidence,
            "resolved conflict"
        );
        Resolution {
            conflict_id: conflict.id,
            strategy: outcome.strategy,
            attempted,
            value: outcome.value,
            confidence: outcome.confidence.clamp(0.0, 1.0),
            rationale: outcome.rationale,
            supporting: outcome.supporting,
            dissenting: outcome.dissenting,
        }
    }

    /// Resolves every conflict, one resolution each, in conflict order.
    #[must_use]
    pub fn resolve_all(&self, conflicts: &[Conflict], ctx: &ResolutionContext<'_>) -> Vec<Resolution> {
        conflicts.iter().map(|c| self.resolve(c, ctx)).collect()
    }

    pub(crate) fn resolve_all_within(
        &self,
        conflicts: &[Conflict],
        ctx: &ResolutionContext<'_>,
        deadline: &Deadline,
    ) -> CorrelateResult<Vec<Resolution>> {
        let mut out = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            deadline.check("resolution")?;
            out.push(self.resolve(conflict, ctx));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_parse_with_aliases() {
        assert_eq!("expert".parse::<Strategy>().unwrap(), Strategy::ExpertWeighting);
        assert_eq!("Hierarchy".parse::<Strategy>().unwrap(), Strategy::Hierarchical);
        assert_eq!("manual".parse::<Strategy>().unwrap(), Strategy::ManualReview);
        assert!(matches!(
            "nope".parse::<Strategy>(),
            Err(ConfigError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn strategy_serializes_with_type_tag() {
        let s = Strategy::Composite {
            chain: vec![Strategy::Consensus],
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "composite");
        assert_eq!(json["chain"][0]["type"], "consensus");
    }
}
