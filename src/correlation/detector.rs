use std::collections::BTreeSet;

use tracing::debug;

use super::{evidence_confidence, Contradiction, Correlation, Evidence, FindingMatch, Relation, StrengthBand};
use crate::config::CorrelationConfig;
use crate::error::CorrelateResult;
use crate::extract::normalize;
use crate::extract::vocabulary::is_blanket_key;
use crate::pattern::{EnginePattern, Finding, Polarity};
use crate::pipeline::Deadline;
use crate::similarity::{char_prefix, jaccard, metric_agreement, relative_gap, text_ratio};

/// Component similarities of one pair; `None` when undefined for the pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Components {
    text: Option<f64>,
    category: Option<f64>,
    metric: Option<f64>,
    keys: Option<f64>,
}

/// Computes pairwise correlations over extracted patterns.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationDetector<'a> {
    config: &'a CorrelationConfig,
}

impl<'a> CorrelationDetector<'a> {
    /// Create a detector over a configuration.
    #[must_use]
    pub const fn new(config: &'a CorrelationConfig) -> Self {
        Self { config }
    }

    /// Correlates every unordered pair, iterating in engine-id order.
    #[must_use]
    pub fn detect(&self, patterns: &[EnginePattern]) -> Vec<Correlation> {
        let unbounded = Deadline::unbounded();
        self.detect_within(patterns, &unbounded).unwrap_or_default()
    }

    pub(crate) fn detect_within(
        &self,
        patterns: &[EnginePattern],
        deadline: &Deadline,
    ) -> CorrelateResult<Vec<Correlation>> {
        let mut ordered: Vec<&EnginePattern> = patterns.iter().collect();
        ordered.sort_by(|x, y| x.engine.cmp(&y.engine));

        let mut out = Vec::new();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                deadline.check("correlation")?;
                if let Some(c) = self.correlate_pair(a, b, deadline)? {
                    out.push(c);
                }
            }
        }
        debug!(engines = ordered.len(), correlations = out.len(), "detected correlations");
        Ok(out)
    }

    fn correlate_pair(
        &self,
        a: &EnginePattern,
        b: &EnginePattern,
        deadline: &Deadline,
    ) -> CorrelateResult<Option<Correlation>> {
        let cfg = self.config;
        let mut evidence = Evidence::default();

        let text = self.text_similarity(a, b, &mut evidence, deadline)?;

        evidence.shared_categories = a.categories.intersection(&b.categories).copied().collect();
        let category = jaccard(&a.categories, &b.categories);

        let mut agreements = Vec::new();
        for (name, ma) in &a.metrics {
            let Some(mb) = b.metrics.get(name) else {
                continue;
            };
            evidence.shared_metrics.push(name.clone());
            agreements.push(metric_agreement(ma.value, mb.value));
            let gap = relative_gap(ma.value, mb.value);
            if cfg.detect_metric_conflicts && gap > cfg.metric_discrepancy_threshold {
                evidence.contradictions.push(Contradiction::Metric {
                    name: name.clone(),
                    a: ma.value,
                    b: mb.value,
                    gap,
                });
            }
        }
        let metric = mean(&agreements);

        let keys = jaccard(&a.finding_keys(), &b.finding_keys());

        self.polarity_contradictions(a, b, &mut evidence, deadline)?;

        let similarity = self.weighted(Components {
            text,
            category,
            metric,
            keys,
        });

        let strongest = evidence
            .contradictions
            .iter()
            .map(Contradiction::magnitude)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |v| v.max(m))));

        let (relation, strength) = if let Some(magnitude) = strongest {
            (Relation::Contradicts, similarity.max(magnitude))
        } else if similarity >= cfg.strong_threshold {
            (Relation::Confirms, similarity)
        } else if similarity >= cfg.similarity_threshold && !evidence.shared_categories.is_empty() {
            (Relation::Complements, similarity)
        } else {
            return Ok(None);
        };

        let strength = strength.clamp(0.0, 1.0);
        if strength < cfg.similarity_threshold {
            return Ok(None);
        }

        Ok(Some(Correlation {
            a: a.engine.clone(),
            b: b.engine.clone(),
            relation,
            strength,
            confidence: evidence_confidence(evidence.volume()),
            band: StrengthBand::of(strength, cfg.moderate_threshold, cfg.strong_threshold),
            similarity,
            evidence,
        }))
    }

    /// Mean of best-match ratios accepted in either direction, or a prefix
    /// comparison of the whole texts when either side has no findings.
    fn text_similarity(
        &self,
        a: &EnginePattern,
        b: &EnginePattern,
        evidence: &mut Evidence,
        deadline: &Deadline,
    ) -> CorrelateResult<Option<f64>> {
        if a.findings.is_empty() || b.findings.is_empty() {
            if a.text.is_empty() && b.text.is_empty() {
                return Ok(None);
            }
            let limit = self.config.text_compare_chars;
            return Ok(Some(text_ratio(
                char_prefix(&a.text, limit),
                char_prefix(&b.text, limit),
            )));
        }

        let limit = self.config.text_compare_chars;
        let norm_a: Vec<String> = a.findings.iter().map(|f| normalize(&f.text)).collect();
        let norm_b: Vec<String> = b.findings.iter().map(|f| normalize(&f.text)).collect();
        let threshold = self.config.finding_match_threshold;

        let mut ratios = vec![vec![0.0; norm_b.len()]; norm_a.len()];
        for (i, ta) in norm_a.iter().enumerate() {
            let ta = char_prefix(ta, limit);
            for (j, tb) in norm_b.iter().enumerate() {
                deadline.check("correlation")?;
                ratios[i][j] = text_ratio(ta, char_prefix(tb, limit));
            }
        }

        let mut accepted = Vec::new();
        let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (i, row) in ratios.iter().enumerate() {
            if let Some((j, best)) = best_index(row.iter().copied()) {
                if best >= threshold {
                    accepted.push(best);
                    pairs.insert((i, j));
                }
            }
        }
        for j in 0..norm_b.len() {
            if let Some((i, best)) = best_index(ratios.iter().map(|row| row[j])) {
                if best >= threshold {
                    accepted.push(best);
                    pairs.insert((i, j));
                }
            }
        }

        evidence.matched_findings = pairs
            .into_iter()
            .map(|(i, j)| FindingMatch {
                a: a.findings[i].text.clone(),
                b: b.findings[j].text.clone(),
                similarity: ratios[i][j],
            })
            .collect();

        Ok(Some(mean(&accepted).unwrap_or(0.0)))
    }

    fn polarity_contradictions(
        &self,
        a: &EnginePattern,
        b: &EnginePattern,
        evidence: &mut Evidence,
        deadline: &Deadline,
    ) -> CorrelateResult<()> {
        for fa in &a.findings {
            deadline.check("correlation")?;
            for fb in &b.findings {
                if fa.category != fb.category || !fa.polarity.opposes(fb.polarity) {
                    continue;
                }
                if let Some(magnitude) = self.contradiction_magnitude(fa, fb) {
                    evidence.contradictions.push(Contradiction::Polarity {
                        category: fa.category,
                        a: fa.clone(),
                        b: fb.clone(),
                        magnitude,
                    });
                }
            }
        }
        Ok(())
    }

    fn contradiction_magnitude(&self, fa: &Finding, fb: &Finding) -> Option<f64> {
        let clear = if fa.polarity == Polarity::Clear { fa } else { fb };
        if is_blanket_key(&clear.key) {
            return Some(1.0);
        }
        let limit = self.config.text_compare_chars;
        let similarity = text_ratio(char_prefix(&fa.key, limit), char_prefix(&fb.key, limit));
        (similarity >= self.config.finding_match_threshold).then_some(similarity)
    }

    fn weighted(&self, c: Components) -> f64 {
        let w = self.config.weights;
        let parts = [
            (w.text, c.text),
            (w.category, c.category),
            (w.metric, c.metric),
            (w.keys, c.keys),
        ];
        let (sum, total) = parts
            .iter()
            .filter_map(|(weight, value)| value.map(|v| (*weight, v)))
            .fold((0.0, 0.0), |(sum, total), (weight, v)| (sum + weight * v, total + weight));
        if total <= 0.0 {
            0.0
        } else {
            (sum / total).clamp(0.0, 1.0)
        }
    }
}

/// Index and value of the maximum; the first index wins ties.
fn best_index(values: impl Iterator<Item = f64>) -> Option<(usize, f64)> {
    values.enumerate().fold(None, |best, (idx, v)| match best {
        Some((_, bv)) if bv >= v => best,
        _ => Some((idx, v)),
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{KeywordExtractor, PatternExtractor};
    use crate::input::EngineResult;

    fn patterns(results: &[EngineResult]) -> Vec<EnginePattern> {
        results.iter().map(|r| KeywordExtractor.extract(r)).collect()
    }

    #[test]
    fn blanket_clear_claim_contradicts_specific_problem() {
        let config = CorrelationConfig::default();
        let found = CorrelationDetector::new(&config).detect(&patterns(&[
            EngineResult::text("engine_a", "No security issues found"),
            EngineResult::text("engine_b", "SQL injection vulnerability in login handler"),
        ]));
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.relation, Relation::Contradicts);
        assert_eq!(c.strength, 1.0);
        assert_eq!(c.a.as_str(), "engine_a");
        assert!(c.confidence > 0.45);
    }

    #[test]
    fn identical_outputs_confirm() {
        let config = CorrelationConfig::default();
        let text = "Memory leak in the parser module\nCoverage: 80%";
        let found = CorrelationDetector::new(&config).detect(&patterns(&[
            EngineResult::text("x", text),
            EngineResult::text("y", text),
        ]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation, Relation::Confirms);
        assert_eq!(found[0].band, StrengthBand::Strong);
        assert_eq!(found[0].evidence.shared_metrics, vec!["coverage".to_string()]);
    }

    #[test]
    fn metric_gap_contradicts() {
        let config = CorrelationConfig::default();
        let found = CorrelationDetector::new(&config).detect(&patterns(&[
            EngineResult::text("a", "Test coverage: 85%"),
            EngineResult::text("b", "Test coverage: 40%"),
        ]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation, Relation::Contradicts);
        assert!(matches!(
            found[0].evidence.contradictions[0],
            Contradiction::Metric { ref name, .. } if name == "coverage"
        ));
    }

    #[test]
    fn unrelated_outputs_are_dropped() {
        let config = CorrelationConfig::default();
        let found = CorrelationDetector::new(&config).detect(&patterns(&[
            EngineResult::text("a", "Missing docstrings in the public documentation"),
            EngineResult::text("b", "Memory leak in worker threads"),
        ]));
        assert!(found.is_empty());
    }

    #[test]
    fn pairs_are_ordered_regardless_of_input_order() {
        let config = CorrelationConfig::default();
        let forward = patterns(&[
            EngineResult::text("zeta", "No security issues found"),
            EngineResult::text("alpha", "Insecure password storage in auth module"),
        ]);
        let mut backward = forward.clone();
        backward.reverse();
        let detector = CorrelationDetector::new(&config);
        let f = detector.detect(&forward);
        let b = detector.detect(&backward);
        assert_eq!(f, b);
        assert_eq!(f[0].a.as_str(), "alpha");
    }

    #[test]
    fn long_findings_compare_only_their_prefix() {
        let config = CorrelationConfig {
            text_compare_chars: 40,
            ..CorrelationConfig::default()
        };
        let head = "Memory leak detected in the parser module";
        let found = CorrelationDetector::new(&config).detect(&patterns(&[
            EngineResult::text("a", format!("{head} {}", "alpha ".repeat(3_000))),
            EngineResult::text("b", format!("{head} {}", "omega ".repeat(3_000))),
        ]));
        let matched = &found[0].evidence.matched_findings;
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].similarity, 1.0);
    }

    #[test]
    fn expired_deadline_aborts() {
        let config = CorrelationConfig::default();
        let deadline = Deadline::expired();
        let result = CorrelationDetector::new(&config).detect_within(
            &patterns(&[EngineResult::text("a", "x issue"), EngineResult::text("b", "y issue")]),
            &deadline,
        );
        assert!(result.unwrap_err().is_timeout());
    }
}
