use std::collections::BTreeMap;

use super::{ResolutionContext, ResolvedValue, Strategy, StrategyOutcome};
use crate::conflict::{Conflict, ConflictValue};
use crate::input::EngineId;
use crate::similarity::relative_gap;

/// Confidence per hierarchy rank; later ranks get [`RANK_FLOOR`].
const RANK_CONFIDENCE: [f64; 4] = [0.9, 0.8, 0.7, 0.6];
const RANK_FLOOR: f64 = 0.5;
const UNRANKED_CONFIDENCE: f64 = 0.3;

const EPSILON: f64 = 1e-9;

/// Builds a chosen-value outcome; engines agreeing with the chosen value
/// support it, the rest dissent.
fn chosen(
    strategy: &Strategy,
    conflict: &Conflict,
    engine: &EngineId,
    confidence: f64,
    rationale: String,
) -> Option<StrategyOutcome> {
    let value = conflict.values.get(engine)?.clone();
    let key = value.comparison_key();
    let mut supporting = Vec::new();
    let mut dissenting = Vec::new();
    for (e, v) in &conflict.values {
        if e == engine || v.comparison_key() == key {
            supporting.push(e.clone());
        } else {
            dissenting.push(e.clone());
        }
    }
    Some(StrategyOutcome {
        strategy: strategy.name().to_string(),
        value: ResolvedValue::Chosen {
            engine: engine.clone(),
            value,
        },
        confidence: confidence.clamp(0.0, 1.0),
        rationale,
        supporting,
        dissenting,
    })
}

/// Highest-scoring engine; the earliest engine id wins ties. Returns the
/// engine, its score and the number of engines tied at the top.
fn best_by(conflict: &Conflict, score: impl Fn(&EngineId) -> f64) -> Option<(&EngineId, f64, usize)> {
    let scored: Vec<(&EngineId, f64)> = conflict.values.keys().map(|e| (e, score(e))).collect();
    let top = scored.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let tied = scored.iter().filter(|(_, s)| (top - s).abs() < EPSILON).count();
    scored
        .into_iter()
        .find(|(_, s)| (top - s).abs() < EPSILON)
        .map(|(e, s)| (e, s, tied))
}

fn agrees(a: &ConflictValue, b: &ConflictValue, tolerance: f64) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => relative_gap(x, y) <= tolerance,
        _ => a.comparison_key() == b.comparison_key(),
    }
}

pub(super) fn consensus(conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Option<StrategyOutcome> {
    let tolerance = ctx.config().consensus_tolerance;
    // Groups are anchored on their first member, in engine-id order.
    let mut groups: Vec<(&ConflictValue, Vec<&EngineId>)> = Vec::new();
    for (engine, value) in &conflict.values {
        match groups.iter_mut().find(|(anchor, _)| agrees(anchor, value, tolerance)) {
            Some((_, members)) => members.push(engine),
            None => groups.push((value, vec![engine])),
        }
    }

    let largest = groups.iter().map(|(_, m)| m.len()).max()?;
    let (anchor, members) = groups.iter().find(|(_, m)| m.len() == largest)?;
    let winner = members[0];
    let participants = conflict.values.len();
    let confidence = largest as f64 / participants as f64;

    let supporting: Vec<EngineId> = members.iter().map(|e| (*e).clone()).collect();
    let dissenting: Vec<EngineId> = conflict
        .values
        .keys()
        .filter(|e| !members.contains(e))
        .cloned()
        .collect();
    Some(StrategyOutcome {
        strategy: Strategy::Consensus.name().to_string(),
        value: ResolvedValue::Chosen {
            engine: winner.clone(),
            value: (*anchor).clone(),
        },
        confidence,
        rationale: format!("{largest} of {participants} engines agree on {anchor}"),
        supporting,
        dissenting,
    })
}

pub(super) fn expert_weighting(conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Option<StrategyOutcome> {
    let category = conflict.category;
    let (engine, weight, tied) = best_by(conflict, |e| ctx.expertise(e, category))?;
    let confidence = weight / tied as f64;
    chosen(
        &Strategy::ExpertWeighting,
        conflict,
        engine,
        confidence,
        format!("chose {engine}'s value based on {category} expertise ({weight:.2})"),
    )
}

pub(super) fn confidence_based(conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Option<StrategyOutcome> {
    let category = conflict.category;
    let (engine, score, _) = best_by(conflict, |e| ctx.score(e, category))?;
    chosen(
        &Strategy::ConfidenceBased,
        conflict,
        engine,
        score,
        format!("chose {engine}'s value with the highest result confidence ({score:.2})"),
    )
}

pub(super) fn hierarchical(conflict: &Conflict, ctx: &ResolutionContext<'_>) -> Option<StrategyOutcome> {
    let ranked = conflict
        .values
        .keys()
        .filter_map(|e| ctx.rank(e).map(|r| (e, r)))
        .min_by_key(|(_, r)| *r);
    match ranked {
        Some((engine, rank)) => {
            let confidence = RANK_CONFIDENCE.get(rank).copied().unwrap_or(RANK_FLOOR);
            chosen(
                &Strategy::Hierarchical,
                conflict,
                engine,
                confidence,
                format!("chose {engine}'s value as the highest-priority engine (rank {})", rank + 1),
            )
        }
        None => {
            let engine = conflict.values.keys().next()?;
            chosen(
                &Strategy::Hierarchical,
                conflict,
                engine,
                UNRANKED_CONFIDENCE,
                format!("no engine is ranked; defaulted to {engine}'s value"),
            )
        }
    }
}

pub(super) fn composite(chain: &[Strategy], conflict: &Conflict, ctx: &ResolutionContext<'_>) -> StrategyOutcome {
    let acceptance = ctx.config().acceptance_threshold;
    for strategy in chain {
        if let Some(outcome) = strategy.apply(conflict, ctx) {
            if outcome.confidence > acceptance {
                return outcome;
            }
        }
    }
    manual_review(conflict, ctx)
}

pub(super) fn manual_review(conflict: &Conflict, ctx: &ResolutionContext<'_>) -> StrategyOutcome {
    let candidates: BTreeMap<EngineId, ConflictValue> = conflict.values.clone();
    let reports: Vec<String> = candidates.iter().map(|(e, v)| format!("{e} reports {v}")).collect();
    StrategyOutcome {
        strategy: Strategy::ManualReview.name().to_string(),
        value: ResolvedValue::Unresolved { candidates },
        confidence: ctx.config().manual_review_confidence,
        rationale: format!("engines disagree ({}); flagged for manual review", reports.join("; ")),
        supporting: Vec::new(),
        dissenting: conflict.values.keys().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorrelationConfig;
    use crate::conflict::{ConflictId, ConflictType, Severity};
    use crate::expertise::ExpertiseTable;
    use crate::pattern::Category;

    fn metric_conflict(values: &[(&str, f64)]) -> Conflict {
        let engines: Vec<EngineId> = values.iter().map(|(e, _)| EngineId::new(*e)).collect();
        Conflict {
            id: ConflictId::derive(ConflictType::MetricDiscrepancy, Category::Testing, "coverage", &engines),
            conflict_type: ConflictType::MetricDiscrepancy,
            severity: Severity::Critical,
            category: Category::Testing,
            subject: "coverage".to_string(),
            values: values
                .iter()
                .map(|(e, v)| {
                    (
                        EngineId::new(*e),
                        ConflictValue::Metric {
                            value: *v,
                            unit: Some("%".to_string()),
                        },
                    )
                })
                .collect(),
            engines,
            gap: 0.7,
        }
    }

    #[test]
    fn consensus_prefers_largest_group() {
        let config = CorrelationConfig::default();
        let ctx = ResolutionContext::new(&config, &[]);
        let conflict = metric_conflict(&[("a", 40.0), ("b", 85.0), ("c", 84.0)]);
        let outcome = consensus(&conflict, &ctx).unwrap();
        assert_eq!(
            outcome.value,
            ResolvedValue::Chosen {
                engine: EngineId::new("b"),
                value: ConflictValue::Metric {
                    value: 85.0,
                    unit: Some("%".to_string())
                }
            }
        );
        assert!((outcome.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.dissenting, vec![EngineId::new("a")]);
    }

    #[test]
    fn consensus_tie_goes_to_earliest_engine() {
        let config = CorrelationConfig::default();
        let ctx = ResolutionContext::new(&config, &[]);
        let outcome = consensus(&metric_conflict(&[("b", 85.0), ("a", 40.0)]), &ctx).unwrap();
        assert_eq!(outcome.supporting, vec![EngineId::new("a")]);
        assert_eq!(outcome.confidence, 0.5);
    }

    #[test]
    fn expert_weighting_divides_ties() {
        let config = CorrelationConfig {
            expertise: ExpertiseTable::empty()
                .with_weight("a", Category::Testing, 0.8)
                .with_weight("b", Category::Testing, 0.8),
            ..CorrelationConfig::default()
        };
        let ctx = ResolutionContext::new(&config, &[]);
        let outcome = expert_weighting(&metric_conflict(&[("a", 1.0), ("b", 9.0)]), &ctx).unwrap();
        assert!((outcome.confidence - 0.4).abs() < 1e-9);
        assert_eq!(outcome.supporting, vec![EngineId::new("a")]);
        assert_eq!(outcome.dissenting, vec![EngineId::new("b")]);
    }

    #[test]
    fn hierarchical_uses_rank_constants() {
        let config = CorrelationConfig {
            priority: vec![EngineId::new("x"), EngineId::new("b"), EngineId::new("a")],
            ..CorrelationConfig::default()
        };
        let ctx = ResolutionContext::new(&config, &[]);
        let outcome = hierarchical(&metric_conflict(&[("a", 1.0), ("b", 9.0)]), &ctx).unwrap();
        assert_eq!(outcome.confidence, 0.8);
        assert!(outcome.rationale.contains("b's value"));

        let unranked = hierarchical(&metric_conflict(&[("p", 1.0), ("q", 9.0)]), &ctx).unwrap();
        assert_eq!(unranked.confidence, UNRANKED_CONFIDENCE);
        assert!(unranked.rationale.contains("p's value"));
    }

    #[test]
    fn composite_falls_through_to_manual_review() {
        let config = CorrelationConfig {
            expertise: ExpertiseTable::empty(),
            ..CorrelationConfig::default()
        };
        let ctx = ResolutionContext::new(&config, &[]);
        let conflict = metric_conflict(&[("a", 1.0), ("b", 9.0)]);
        let outcome = composite(&Strategy::default_chain(), &conflict, &ctx);
        assert_eq!(outcome.strategy, "manual_review");
        assert!(matches!(
            outcome.value,
            ResolvedValue::Unresolved { ref candidates } if candidates.len() == 2
        ));
        assert_eq!(outcome.confidence, 0.3);
    }

    #[test]
    fn composite_accepts_first_confident_member() {
        let config = CorrelationConfig {
            expertise: ExpertiseTable::empty().with_weight("b", Category::Testing, 0.9),
            ..CorrelationConfig::default()
        };
        let ctx = ResolutionContext::new(&config, &[]);
        let conflict = metric_conflict(&[("a", 1.0), ("b", 9.0)]);
        let outcome = composite(&Strategy::default_chain(), &conflict, &ctx);
        assert_eq!(outcome.strategy, "expert_weighting");
        assert!((outcome.confidence - 0.9).abs() < 1e-9);
    }
}
