use super::Strategy;
use crate::config::CorrelationConfig;
use crate::conflict::ConflictType;

/// Maps a conflict type to the strategy that resolves it.
///
/// Configured overrides replace the defaults per type.
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector<'a> {
    config: &'a CorrelationConfig,
}

impl<'a> StrategySelector<'a> {
    /// Create a selector over a configuration.
    #[must_use]
    pub const fn new(config: &'a CorrelationConfig) -> Self {
        Self { config }
    }

    /// The default strategy for a conflict type.
    #[must_use]
    pub fn default_for(conflict_type: ConflictType) -> Strategy {
        match conflict_type {
            ConflictType::MetricDiscrepancy => Strategy::ConfidenceBased,
            ConflictType::RecommendationConflict => Strategy::Composite {
                chain: vec![Strategy::ExpertWeighting],
            },
            ConflictType::ContradictoryResult => Strategy::Composite {
                chain: Strategy::default_chain(),
            },
        }
    }

    /// The strategy to use: the configured override, else the default.
    #[must_use]
    pub fn select(&self, conflict_type: ConflictType) -> Strategy {
        self.config
            .strategy_overrides
            .get(&conflict_type)
            .cloned()
            .unwrap_or_else(|| Self::default_for(conflict_type))
    }
}
