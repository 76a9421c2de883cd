use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{Conflict, ConflictId, ConflictType, ConflictValue, Severity};
use crate::config::CorrelationConfig;
use crate::correlation::{Contradiction, Correlation, Relation};
use crate::error::CorrelateResult;
use crate::extract::metric_category;
use crate::extract::vocabulary::actions_oppose;
use crate::input::EngineId;
use crate::pattern::{Category, EnginePattern, Finding, Metric, Polarity, Recommendation};
use crate::pipeline::Deadline;
use crate::similarity::{jaccard, relative_gap};

/// Derives conflicts from contradicting correlations and raw patterns.
#[derive(Debug, Clone, Copy)]
pub struct ConflictIdentifier<'a> {
    config: &'a CorrelationConfig,
}

impl<'a> ConflictIdentifier<'a> {
    /// Create an identifier over a configuration.
    #[must_use]
    pub const fn new(config: &'a CorrelationConfig) -> Self {
        Self { config }
    }

    /// Identifies every conflict: contradictory results first, then metric
    /// discrepancies, then recommendation conflicts.
    #[must_use]
    pub fn identify(&self, patterns: &[EnginePattern], correlations: &[Correlation]) -> Vec<Conflict> {
        let unbounded = Deadline::unbounded();
        self.identify_within(patterns, correlations, &unbounded)
            .unwrap_or_default()
    }

    pub(crate) fn identify_within(
        &self,
        patterns: &[EnginePattern],
        correlations: &[Correlation],
        deadline: &Deadline,
    ) -> CorrelateResult<Vec<Conflict>> {
        let mut ordered: Vec<&EnginePattern> = patterns.iter().collect();
        ordered.sort_by(|x, y| x.engine.cmp(&y.engine));

        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |conflict: Conflict, out: &mut Vec<Conflict>| {
            if seen.insert(conflict.id) {
                out.push(conflict);
            }
        };

        for correlation in correlations.iter().filter(|c| c.relation == Relation::Contradicts) {
            for conflict in self.contradictory_results(correlation) {
                push(conflict, &mut out);
            }
        }
        deadline.check("conflict identification")?;

        if self.config.detect_metric_conflicts {
            for conflict in self.metric_discrepancies(&ordered) {
                push(conflict, &mut out);
            }
        }
        deadline.check("conflict identification")?;

        if self.config.detect_recommendation_conflicts {
            for (i, a) in ordered.iter().enumerate() {
                for b in &ordered[i + 1..] {
                    deadline.check("conflict identification")?;
                    for conflict in self.recommendation_conflicts(a, b) {
                        push(conflict, &mut out);
                    }
                }
            }
        }

        debug!(conflicts = out.len(), "identified conflicts");
        Ok(out)
    }

    fn severity(&self, gap: f64, category: Category) -> Severity {
        Severity::classify(
            gap,
            self.config.metric_discrepancy_threshold,
            category,
            &self.config.critical_categories,
        )
    }

    /// One conflict per category, built from the strongest contradiction.
    fn contradictory_results(&self, correlation: &Correlation) -> Vec<Conflict> {
        let mut strongest: BTreeMap<Category, (&Finding, &Finding, f64)> = BTreeMap::new();
        for contradiction in &correlation.evidence.contradictions {
            let Contradiction::Polarity {
                category, a, b, magnitude,
            } = contradiction
            else {
                continue;
            };
            let keep = strongest
                .get(category)
                .map_or(true, |(_, _, best)| *magnitude > *best);
            if keep {
                strongest.insert(*category, (a, b, *magnitude));
            }
        }

        strongest
            .into_iter()
            .map(|(category, (fa, fb, magnitude))| {
                let problem = if fa.polarity == Polarity::Problem { fa } else { fb };
                let engines = vec![correlation.a.clone(), correlation.b.clone()];
                let values = BTreeMap::from([
                    (correlation.a.clone(), finding_value(fa)),
                    (correlation.b.clone(), finding_value(fb)),
                ]);
                Conflict {
                    id: ConflictId::derive(
                        ConflictType::ContradictoryResult,
                        category,
                        &problem.key,
                        &engines,
                    ),
                    conflict_type: ConflictType::ContradictoryResult,
                    severity: self.severity(magnitude, category),
                    category,
                    subject: problem.key.clone(),
                    engines,
                    values,
                    gap: magnitude,
                }
            })
            .collect()
    }

    /// A metric conflicts when any pair of reporters exceeds the threshold;
    /// every reporter participates.
    fn metric_discrepancies(&self, ordered: &[&EnginePattern]) -> Vec<Conflict> {
        let mut by_name: BTreeMap<&str, Vec<&Metric>> = BTreeMap::new();
        for pattern in ordered {
            for (name, metric) in &pattern.metrics {
                by_name.entry(name.as_str()).or_default().push(metric);
            }
        }

        let mut out = Vec::new();
        for (name, readings) in by_name {
            if readings.len() < 2 {
                continue;
            }
            let mut max_gap = 0.0_f64;
            for (i, x) in readings.iter().enumerate() {
                for y in &readings[i + 1..] {
                    max_gap = max_gap.max(relative_gap(x.value, y.value));
                }
            }
            if max_gap <= self.config.metric_discrepancy_threshold {
                continue;
            }

            let category = metric_category(name);
            let engines: Vec<EngineId> = readings.iter().map(|m| m.source.clone()).collect();
            let values = readings
                .iter()
                .map(|m| {
                    (
                        m.source.clone(),
                        ConflictValue::Metric {
                            value: m.value,
                            unit: m.unit.clone(),
                        },
                    )
                })
                .collect();
            out.push(Conflict {
                id: ConflictId::derive(ConflictType::MetricDiscrepancy, category, name, &engines),
                conflict_type: ConflictType::MetricDiscrepancy,
                severity: self.severity(max_gap, category),
                category,
                subject: name.to_string(),
                engines,
                values,
                gap: max_gap,
            });
        }
        out
    }

    fn recommendation_conflicts(&self, a: &EnginePattern, b: &EnginePattern) -> Vec<Conflict> {
        let mut out = Vec::new();
        for ra in &a.recommendations {
            let Some(action_a) = ra.action.as_deref() else {
                continue;
            };
            for rb in &b.recommendations {
                let Some(action_b) = rb.action.as_deref() else {
                    continue;
                };
                if !actions_oppose(action_a, action_b) || !ra.category.is_compatible(rb.category) {
                    continue;
                }
                let Some(overlap) = jaccard(&ra.subject, &rb.subject) else {
                    continue;
                };
                if overlap < self.config.subject_overlap_threshold {
                    continue;
                }
                out.push(self.recommendation_conflict(a, b, ra, rb, overlap));
            }
        }
        out
    }

    fn recommendation_conflict(
        &self,
        a: &EnginePattern,
        b: &EnginePattern,
        ra: &Recommendation,
        rb: &Recommendation,
        overlap: f64,
    ) -> Conflict {
        let category = if ra.category == Category::General {
            rb.category
        } else {
            ra.category
        };
        let subject: Vec<&str> = ra
            .subject
            .intersection(&rb.subject)
            .map(String::as_str)
            .collect();
        let subject = subject.join(" ");
        let engines = vec![a.engine.clone(), b.engine.clone()];
        let values = BTreeMap::from([
            (a.engine.clone(), recommendation_value(ra)),
            (b.engine.clone(), recommendation_value(rb)),
        ]);
        Conflict {
            id: ConflictId::derive(ConflictType::RecommendationConflict, category, &subject, &engines),
            conflict_type: ConflictType::RecommendationConflict,
            severity: self.severity(overlap, category),
            category,
            subject,
            engines,
            values,
            gap: overlap,
        }
    }
}

fn finding_value(f: &Finding) -> ConflictValue {
    ConflictValue::Finding {
        text: f.text.clone(),
        polarity: f.polarity,
    }
}

fn recommendation_value(r: &Recommendation) -> ConflictValue {
    ConflictValue::Recommendation {
        text: r.text.clone(),
        action: r.action.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationDetector;
    use crate::extract::{KeywordExtractor, PatternExtractor};
    use crate::input::EngineResult;

    fn run(config: &CorrelationConfig, results: &[EngineResult]) -> Vec<Conflict> {
        let patterns: Vec<EnginePattern> = results.iter().map(|r| KeywordExtractor.extract(r)).collect();
        let correlations = CorrelationDetector::new(config).detect(&patterns);
        ConflictIdentifier::new(config).identify(&patterns, &correlations)
    }

    #[test]
    fn coverage_gap_is_critical_metric_discrepancy() {
        let config = CorrelationConfig::default();
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "coverage: 85%"),
                EngineResult::text("b", "coverage: 40%"),
            ],
        );
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::MetricDiscrepancy);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.category, Category::Testing);
        assert_eq!(c.values.len(), 2);
    }

    #[test]
    fn metric_conflict_includes_every_reporter() {
        let config = CorrelationConfig::default();
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "latency 100ms"),
                EngineResult::text("b", "latency 110ms"),
                EngineResult::text("c", "latency 300ms"),
            ],
        );
        let metric: Vec<_> = conflicts
            .iter()
            .filter(|c| c.conflict_type == ConflictType::MetricDiscrepancy)
            .collect();
        assert_eq!(metric.len(), 1);
        assert_eq!(metric[0].engines.len(), 3);
    }

    #[test]
    fn close_metrics_do_not_conflict() {
        let config = CorrelationConfig::default();
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "coverage: 80%"),
                EngineResult::text("b", "coverage: 78%"),
            ],
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn opposing_recommendations_conflict() {
        let config = CorrelationConfig::default();
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "use synchronous I/O for simplicity"),
                EngineResult::text("b", "avoid synchronous I/O — causes blocking"),
            ],
        );
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::RecommendationConflict);
        assert_eq!(c.category, Category::Performance);
        assert_eq!(c.severity, Severity::Moderate);
        assert!(c.subject.contains("synchronous"));
    }

    #[test]
    fn contradiction_yields_conflict_for_both_engines() {
        let config = CorrelationConfig::default();
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "No security issues found"),
                EngineResult::text("b", "SQL injection vulnerability in login handler"),
            ],
        );
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::ContradictoryResult);
        assert_eq!(c.severity, Severity::Critical);
        assert!(c.involves(&EngineId::new("a")) && c.involves(&EngineId::new("b")));
    }

    #[test]
    fn disabled_families_emit_nothing() {
        let config = CorrelationConfig {
            detect_metric_conflicts: false,
            detect_recommendation_conflicts: false,
            ..CorrelationConfig::default()
        };
        let conflicts = run(
            &config,
            &[
                EngineResult::text("a", "coverage: 85%\nuse synchronous I/O for simplicity"),
                EngineResult::text("b", "coverage: 40%\navoid synchronous I/O — causes blocking"),
            ],
        );
        assert!(conflicts.is_empty());
    }
}
