use std::sync::Arc;

use std::collections::BTreeSet;

use crosscheck::{
    Category, ConfidenceScorer, CorrelationConfig, EngineResult, ExpertiseTable, KeywordExtractor,
    PatternExtractor, Pipeline, Relation,
};
use proptest::prelude::*;

const PHRASES: &[&str] = &[
    "No security issues found",
    "SQL injection vulnerability in login handler",
    "Memory leak in the parser module",
    "coverage: 85%",
    "coverage: 40%",
    "latency 120ms",
    "latency 480ms",
    "Missing docstrings in public functions",
    "use synchronous I/O for simplicity",
    "avoid synchronous I/O for request handlers",
    "All tests passed",
    "Code is clean and well structured",
    "Consider adding caching to the hot path",
    "3 errors and 12 warnings reported",
];

fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(PHRASES), 1..4).prop_map(|lines| lines.join("\n"))
}

fn arb_results() -> impl Strategy<Value = Vec<EngineResult>> {
    prop::collection::vec(arb_text(), 2..5).prop_map(|texts| {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| EngineResult::text(format!("engine_{i}"), text))
            .collect()
    })
}

/// Findings that disagree in polarity within a shared category.
const OPPOSED: &[&str] = &[
    "No security issues found",
    "SQL injection vulnerability in login handler",
    "Hard-coded credentials in settings module",
    "No performance problems detected",
    "Memory leak in the parser module",
    "All tests passed",
    "Missing unit tests for the parser",
    "Code is clean and well structured",
    "Duplicated logic in the request handlers",
];

fn arb_opposed_text() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(OPPOSED), 1..3),
        prop::option::of(0u32..=100),
        prop::option::of(1u32..2_000),
    )
        .prop_map(|(lines, coverage, latency)| {
            let mut lines: Vec<String> = lines.into_iter().map(str::to_string).collect();
            if let Some(coverage) = coverage {
                lines.push(format!("coverage: {coverage}%"));
            }
            if let Some(latency) = latency {
                lines.push(format!("latency {latency}ms"));
            }
            lines.join("\n")
        })
}

fn arb_opposed_results() -> impl Strategy<Value = Vec<EngineResult>> {
    prop::collection::vec(arb_opposed_text(), 2..5).prop_map(|texts| {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| EngineResult::text(format!("engine_{i}"), text))
            .collect()
    })
}

fn pipeline() -> Pipeline {
    Pipeline::new(Arc::new(CorrelationConfig::default()))
}

proptest! {
    #[test]
    fn confidence_scores_stay_in_unit_range(text in ".{0,300}") {
        let table = ExpertiseTable::builtin();
        let scorer = ConfidenceScorer::new(&table);
        let pattern = KeywordExtractor.extract(&EngineResult::text("code_review", text));
        for category in [Category::Security, Category::Performance, Category::General] {
            let score = scorer.score(&pattern, category);
            prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn extraction_never_panics_on_arbitrary_json(key in "[a-z]{1,8}", n in any::<f64>(), s in ".{0,50}") {
        let value = serde_json::json!({ key.clone(): n, "findings": [s.clone(), { "text": s }] });
        let pattern = KeywordExtractor.extract(&EngineResult::structured("e", value));
        prop_assert!(pattern.metrics.values().all(|m| m.value.is_finite()));
    }

    #[test]
    fn correlations_are_bounded_and_ordered(results in arb_results()) {
        let bundle = pipeline().run(&results).unwrap();
        for c in &bundle.correlations {
            prop_assert!(c.a < c.b);
            prop_assert!((0.0..=1.0).contains(&c.strength));
            prop_assert!((0.0..=1.0).contains(&c.confidence));
        }
    }

    #[test]
    fn input_order_does_not_matter(results in arb_results()) {
        let mut reversed = results.clone();
        reversed.reverse();
        prop_assert_eq!(pipeline().run(&results).unwrap(), pipeline().run(&reversed).unwrap());
    }

    #[test]
    fn every_conflict_gets_exactly_one_resolution(results in arb_results()) {
        let bundle = pipeline().run(&results).unwrap();
        prop_assert_eq!(bundle.conflicts.len(), bundle.resolutions.len());
        for (conflict, resolution) in bundle.conflicts.iter().zip(&bundle.resolutions) {
            prop_assert_eq!(conflict.id, resolution.conflict_id);
            prop_assert!(conflict.engines.len() >= 2);
            prop_assert!((0.0..=1.0).contains(&resolution.confidence));
        }
    }

    #[test]
    fn every_contradiction_is_backed_by_a_conflict(results in arb_opposed_results()) {
        let bundle = pipeline().run(&results).unwrap();
        for c in bundle.correlations.iter().filter(|c| c.relation == Relation::Contradicts) {
            let covered = bundle
                .conflicts
                .iter()
                .any(|k| k.engines.contains(&c.a) && k.engines.contains(&c.b));
            prop_assert!(covered, "no conflict names {} and {}", c.a, c.b);
        }
    }

    #[test]
    fn resolutions_are_keyed_by_conflict_id(results in arb_opposed_results()) {
        let bundle = pipeline().run(&results).unwrap();
        let conflict_ids: BTreeSet<_> = bundle.conflicts.iter().map(|c| c.id).collect();
        let resolution_ids: BTreeSet<_> = bundle.resolutions.iter().map(|r| r.conflict_id).collect();
        prop_assert_eq!(&conflict_ids, &resolution_ids);
        prop_assert_eq!(bundle.resolutions.len(), bundle.conflicts.len());
        for conflict in &bundle.conflicts {
            let resolution = bundle.resolution_for(&conflict.id);
            prop_assert!(resolution.is_some_and(|r| r.conflict_id == conflict.id));
        }
    }
}
