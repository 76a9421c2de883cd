//! The synchronous correlation pipeline.
//!
//! Extraction, correlation, conflict identification and resolution run in
//! sequence with no internal suspension. A cooperative [`Deadline`] is
//! checked between engines and inside the pairwise loops.

use std::borrow::Borrow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::bundle::Bundle;
use crate::config::CorrelationConfig;
use crate::conflict::ConflictIdentifier;
use crate::correlation::CorrelationDetector;
use crate::error::{CorrelateError, CorrelateResult};
use crate::extract::{KeywordExtractor, PatternExtractor};
use crate::input::EngineResult;
use crate::pattern::EnginePattern;
use crate::resolution::{ResolutionContext, ResolutionEngine};

/// A time budget measured from construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub(crate) fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Fails with a timeout once the budget is spent.
    pub(crate) fn check(&self, stage: &'static str) -> CorrelateResult<()> {
        match self.budget {
            Some(budget) => {
                let elapsed = self.started.elapsed();
                if elapsed >= budget {
                    Err(CorrelateError::timeout(stage, elapsed))
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

/// Engine results in canonical order: ascending engine id, first result
/// per engine id kept.
pub(crate) fn canonical(results: &[EngineResult]) -> Vec<&EngineResult> {
    let mut ordered: Vec<&EngineResult> = results.iter().collect();
    order_and_dedup(&mut ordered);
    ordered
}

/// Owned form of [`canonical`].
pub(crate) fn into_canonical(mut results: Vec<EngineResult>) -> Vec<EngineResult> {
    order_and_dedup(&mut results);
    results
}

fn order_and_dedup<T: Borrow<EngineResult>>(items: &mut Vec<T>) {
    items.sort_by(|x, y| x.borrow().engine.cmp(&y.borrow().engine));
    let before = items.len();
    items.dedup_by(|later, earlier| {
        <T as Borrow<EngineResult>>::borrow(later).engine
            == <T as Borrow<EngineResult>>::borrow(earlier).engine
    });
    if items.len() != before {
        warn!(
            dropped = before - items.len(),
            "duplicate engine ids; keeping the first result per engine"
        );
    }
}

/// Extractor, detector, identifier and resolution engine composed over one
/// shared configuration.
#[derive(Debug, Clone)]
pub struct Pipeline<X: PatternExtractor = KeywordExtractor> {
    config: Arc<CorrelationConfig>,
    extractor: X,
}

impl Pipeline<KeywordExtractor> {
    /// Create a pipeline with the keyword extractor.
    #[must_use]
    pub fn new(config: Arc<CorrelationConfig>) -> Self {
        Self::with_extractor(config, KeywordExtractor::new())
    }
}

impl<X: PatternExtractor> Pipeline<X> {
    /// Create a pipeline with a custom extractor.
    #[must_use]
    pub fn with_extractor(config: Arc<CorrelationConfig>, extractor: X) -> Self {
        Self { config, extractor }
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<CorrelationConfig> {
        &self.config
    }

    /// The extractor.
    #[must_use]
    pub const fn extractor(&self) -> &X {
        &self.extractor
    }

    /// Runs the pipeline under the configured deadline.
    pub fn run(&self, results: &[EngineResult]) -> CorrelateResult<Bundle> {
        self.run_within(results, &Deadline::new(self.config.pipeline_timeout()))
    }

    /// Runs the pipeline over results already in canonical order.
    pub(crate) fn run_canonical(&self, results: &[EngineResult]) -> CorrelateResult<Bundle> {
        let deadline = Deadline::new(self.config.pipeline_timeout());
        self.run_ordered(results.iter().collect(), &deadline)
    }

    pub(crate) fn run_within(
        &self,
        results: &[EngineResult],
        deadline: &Deadline,
    ) -> CorrelateResult<Bundle> {
        self.run_ordered(canonical(results), deadline)
    }

    #[instrument(level = "debug", skip_all, fields(engines = ordered.len()))]
    fn run_ordered(
        &self,
        ordered: Vec<&EngineResult>,
        deadline: &Deadline,
    ) -> CorrelateResult<Bundle> {
        let engine_count = ordered.len();
        if engine_count <= 1 {
            return Ok(Bundle::empty(engine_count));
        }

        let limit = self.config.max_engines;
        let skipped_engines = ordered
            .iter()
            .skip(limit)
            .map(|r| r.engine.clone())
            .collect::<Vec<_>>();
        if !skipped_engines.is_empty() {
            warn!(limit, skipped = skipped_engines.len(), "engine limit reached");
        }

        let mut patterns: Vec<EnginePattern> = Vec::with_capacity(engine_count.min(limit));
        for result in ordered.into_iter().take(limit) {
            deadline.check("extraction")?;
            patterns.push(self.extractor.extract(result));
        }
        deadline.check("extraction")?;

        let config = self.config.as_ref();
        let correlations = CorrelationDetector::new(config).detect_within(&patterns, deadline)?;
        let conflicts =
            ConflictIdentifier::new(config).identify_within(&patterns, &correlations, deadline)?;
        let ctx = ResolutionContext::new(config, &patterns);
        let resolutions =
            ResolutionEngine::new(config).resolve_all_within(&conflicts, &ctx, deadline)?;

        debug!(
            correlations = correlations.len(),
            conflicts = conflicts.len(),
            resolutions = resolutions.len(),
            "pipeline finished"
        );
        Ok(Bundle {
            correlations,
            conflicts,
            resolutions,
            engine_count,
            skipped_engines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(CorrelationConfig::default()))
    }

    #[test]
    fn single_engine_yields_empty_bundle() {
        let bundle = pipeline()
            .run(&[EngineResult::text("a", "SQL injection vulnerability in login")])
            .unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.engine_count, 1);
    }

    #[test]
    fn duplicate_engine_keeps_first_result() {
        let results = [
            EngineResult::text("a", "first"),
            EngineResult::text("a", "second"),
        ];
        let ordered = canonical(&results);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].payload, results[0].payload);
    }

    #[test]
    fn owned_canonical_matches_borrowed() {
        let results = vec![
            EngineResult::text("c", "third"),
            EngineResult::text("a", "first"),
            EngineResult::text("c", "ignored"),
            EngineResult::text("b", "second"),
        ];
        let borrowed: Vec<EngineResult> = canonical(&results).into_iter().cloned().collect();
        let owned = into_canonical(results);
        assert_eq!(owned, borrowed);
        let ids: Vec<&str> = owned.iter().map(|r| r.engine.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(owned[2].payload, EngineResult::text("c", "third").payload);
    }

    #[test]
    fn oversized_findings_stay_within_the_deadline() {
        let config = CorrelationConfig {
            pipeline_timeout_ms: 10,
            ..CorrelationConfig::default()
        };
        let filler = "abcdefghij ".repeat(2_000);
        let results = [
            EngineResult::text("a", format!("Memory leak detected {filler}")),
            EngineResult::text("b", format!("Memory leak detected {filler}")),
        ];
        let started = Instant::now();
        let outcome = Pipeline::new(Arc::new(config)).run(&results);
        let elapsed = started.elapsed();
        assert!(outcome.is_ok() || outcome.unwrap_err().is_timeout());
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[test]
    fn engine_limit_truncates_highest_ids() {
        let config = CorrelationConfig {
            max_engines: 2,
            ..CorrelationConfig::default()
        };
        let results: Vec<EngineResult> = ["c", "a", "b"]
            .iter()
            .map(|e| EngineResult::text(*e, "Memory leak in parser"))
            .collect();
        let bundle = Pipeline::new(Arc::new(config)).run(&results).unwrap();
        assert!(bundle.truncated());
        assert_eq!(bundle.skipped_engines, vec![crate::input::EngineId::new("c")]);
        assert_eq!(bundle.engine_count, 3);
        assert!(bundle.correlations.iter().all(|c| c.b.as_str() != "c"));
    }

    #[test]
    fn every_conflict_is_resolved() {
        let bundle = pipeline()
            .run(&[
                EngineResult::text("a", "coverage: 85%\nuse synchronous I/O for simplicity"),
                EngineResult::text("b", "coverage: 40%\navoid synchronous I/O — causes blocking"),
            ])
            .unwrap();
        assert_eq!(bundle.conflicts.len(), 2);
        assert_eq!(bundle.resolutions.len(), 2);
        for conflict in &bundle.conflicts {
            assert!(bundle.resolution_for(&conflict.id).is_some());
        }
    }

    #[test]
    fn expired_deadline_times_out() {
        let err = pipeline()
            .run_within(
                &[EngineResult::text("a", "x"), EngineResult::text("b", "y")],
                &Deadline::expired(),
            )
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
