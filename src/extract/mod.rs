//! Pattern extraction: one raw engine result into an [`EnginePattern`].
//!
//! Extraction never fails. Malformed structured fields are skipped and
//! logged at debug level; empty content yields an empty pattern.

mod structured;
mod text;
pub(crate) mod vocabulary;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::input::{EngineResult, Payload};
use crate::pattern::{Category, EnginePattern, Finding, Metric, Recommendation};

pub(crate) use text::normalize;
use text::{classify_unit, extract_metrics, segment, Unit};
use vocabulary::{categories_of, tokenize};

/// Metric names the extractor recognizes in structured fields.
pub const KNOWN_METRICS: &[&str] = &[
    "coverage",
    "latency",
    "memory",
    "cpu",
    "complexity",
    "errors",
    "warnings",
    "issues",
    "vulnerabilities",
];

/// Turns an engine result into an [`EnginePattern`].
pub trait PatternExtractor: Send + Sync {
    /// Name of the extractor (for audit/debugging).
    fn name(&self) -> &str;

    /// Extracts findings, metrics, recommendations and categories.
    fn extract(&self, result: &EngineResult) -> EnginePattern;
}

/// Keyword/signal-matching extractor over a fixed domain vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    /// Create a new extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Accumulator shared by the text and structured paths.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub metrics: BTreeMap<String, Metric>,
    pub categories: BTreeSet<Category>,
    /// Text still to be segmented and classified.
    pub text: Vec<String>,
    /// Text already classified by the structured path.
    pub classified_text: Vec<String>,
}

impl PatternExtractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keyword"
    }

    fn extract(&self, result: &EngineResult) -> EnginePattern {
        let engine = result.engine.clone();
        let mut out = Collected::default();
        let mut pattern = EnginePattern::empty(engine.clone());

        match &result.payload {
            Payload::Text { text } => {
                pattern.content_len = text.chars().count();
                pattern.multiline = text.lines().filter(|l| !l.trim().is_empty()).count() > 1;
                out.text.push(text.clone());
            }
            Payload::Structured { fields } => {
                pattern.structured = true;
                pattern.field_count = fields.len();
                pattern.content_len = serde_json::to_string(fields)
                    .map(|s| s.chars().count())
                    .unwrap_or(0);
                structured::collect(fields, &engine, &mut out);
            }
        }

        for body in &out.text {
            for unit in segment(body) {
                match classify_unit(&unit, &engine) {
                    Unit::Finding(f) => out.findings.push(f),
                    Unit::Recommendation(r) => out.recommendations.push(r),
                    Unit::Plain => {}
                }
            }
            for raw in extract_metrics(body) {
                out.metrics
                    .entry(raw.name.to_string())
                    .or_insert_with(|| Metric {
                        name: raw.name.to_string(),
                        value: raw.value,
                        unit: raw.unit.map(str::to_string),
                        source: engine.clone(),
                    });
            }
        }

        for body in out.text.iter().chain(&out.classified_text) {
            out.categories.extend(categories_of(&tokenize(body)));
        }
        out.categories.extend(
            out.findings
                .iter()
                .map(|f| f.category)
                .chain(out.recommendations.iter().map(|r| r.category))
                .filter(|c| *c != Category::General),
        );

        for (name, value) in &result.metrics {
            if !value.is_finite() {
                continue;
            }
            let name = canonical_metric_name(name);
            let unit = out
                .metrics
                .get(&name)
                .and_then(|m| m.unit.clone())
                .or_else(|| default_unit(&name).map(str::to_string));
            out.metrics.insert(
                name.clone(),
                Metric {
                    name,
                    value: *value,
                    unit,
                    source: engine.clone(),
                },
            );
        }

        let mut seen = BTreeSet::new();
        out.findings
            .retain(|f| seen.insert((f.category, f.polarity, f.key.clone())));

        pattern.text = normalize(
            &out.text
                .iter()
                .chain(&out.classified_text)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        );
        pattern.findings = out.findings;
        pattern.recommendations = out.recommendations;
        pattern.metrics = out.metrics;
        pattern.categories = out.categories;

        debug!(
            engine = %pattern.engine,
            findings = pattern.findings.len(),
            metrics = pattern.metrics.len(),
            recommendations = pattern.recommendations.len(),
            "extracted pattern"
        );
        pattern
    }
}

/// Canonical metric name: lowercase, unit suffixes dropped, synonyms merged.
#[must_use]
pub fn canonical_metric_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    let stem = ["_percent", "_pct", "_ms", "_mb", "_count", "_total"]
        .iter()
        .find_map(|suffix| lower.strip_suffix(suffix))
        .unwrap_or(&lower);
    match stem {
        "test_coverage" | "code_coverage" | "line_coverage" => "coverage",
        "response_time" | "p95" | "p99" | "p95_latency" | "duration" => "latency",
        "memory_usage" | "mem" => "memory",
        "cpu_usage" => "cpu",
        "cyclomatic_complexity" => "complexity",
        "error" => "errors",
        "warning" => "warnings",
        "findings" | "issue" | "problems" => "issues",
        "vulnerability" | "vulns" => "vulnerabilities",
        other => other,
    }
    .to_string()
}

pub(crate) fn is_known_metric(name: &str) -> bool {
    KNOWN_METRICS.contains(&name)
}

fn default_unit(name: &str) -> Option<&'static str> {
    match name {
        "coverage" | "cpu" => Some("%"),
        "latency" => Some("ms"),
        "memory" => Some("MB"),
        "errors" | "warnings" | "issues" | "vulnerabilities" => Some("count"),
        _ => None,
    }
}

/// Domain category a metric belongs to.
#[must_use]
pub fn metric_category(name: &str) -> Category {
    match name {
        "coverage" => Category::Testing,
        "latency" | "memory" | "cpu" => Category::Performance,
        "errors" | "warnings" | "complexity" => Category::Quality,
        "vulnerabilities" => Category::Security,
        other => Category::parse_lenient(other),
    }
}
