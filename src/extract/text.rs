//! Free-text extraction path.
//!
//! Text is split into semantic units (lines, then sentences) and each unit
//! is classified by keyword matching against the fixed vocabulary.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::extract::vocabulary::{
    action_of, contains_any, content_tokens, dominant_category, tokenize, HEALTH_WORDS,
    IMPERATIVES, ISSUE_SIGNALS, NEGATIONS, SUGGESTION_WORDS,
};
use crate::input::EngineId;
use crate::pattern::{Finding, FindingSeverity, Polarity, Recommendation};

/// Units shorter than this are never findings.
pub(crate) const MIN_FINDING_LEN: usize = 10;

/// Units shorter than this are never recommendations.
pub(crate) const MIN_RECOMMENDATION_LEN: usize = 12;

/// How far back (in tokens) a negation reaches.
const NEGATION_WINDOW: usize = 3;

/// Classification of one unit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Unit {
    Finding(Finding),
    Recommendation(Recommendation),
    Plain,
}

/// A metric occurrence found in text, already in its canonical unit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawMetric {
    pub name: &'static str,
    pub value: f64,
    pub unit: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
enum UnitKind {
    Percent,
    Millis,
    Megabytes,
    Count,
    Plain,
}

struct MetricRule {
    name: &'static str,
    pattern: Regex,
    kind: UnitKind,
}

fn metric_rules() -> &'static [MetricRule] {
    static RULES: OnceLock<Vec<MetricRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: &[(&'static str, &str, UnitKind)] = &[
            ("coverage", r"(?i)coverage[^0-9\n]{0,20}?(\d+(?:\.\d+)?)\s*%", UnitKind::Percent),
            (
                "coverage",
                r"(?i)(\d+(?:\.\d+)?)\s*%\s*(?:test\s+|code\s+|line\s+|branch\s+)?coverage",
                UnitKind::Percent,
            ),
            ("cpu", r"(?i)cpu[^0-9\n]{0,20}?(\d+(?:\.\d+)?)\s*%", UnitKind::Percent),
            (
                "latency",
                r"(?i)(?:latency|response\s+time|duration|p9[59])[^0-9\n]{0,20}?(\d+(?:\.\d+)?)\s*(ms|us|s)\b",
                UnitKind::Millis,
            ),
            ("memory", r"(?i)memory[^0-9\n]{0,20}?(\d+(?:\.\d+)?)\s*(kb|mb|gb)\b", UnitKind::Megabytes),
            ("errors", r"(?i)\b(\d+)\s+errors?\b", UnitKind::Count),
            ("warnings", r"(?i)\b(\d+)\s+warnings?\b", UnitKind::Count),
            ("issues", r"(?i)\b(\d+)\s+(?:issues?|problems?)\b", UnitKind::Count),
            ("vulnerabilities", r"(?i)\b(\d+)\s+vulnerabilit(?:y|ies)\b", UnitKind::Count),
            ("complexity", r"(?i)complexity[^0-9\n]{0,20}?(\d+(?:\.\d+)?)", UnitKind::Plain),
        ];
        table
            .iter()
            .filter_map(|&(name, pattern, kind)| {
                Regex::new(pattern)
                    .ok()
                    .map(|pattern| MetricRule { name, pattern, kind })
            })
            .collect()
    })
}

/// Scans text for `number + unit` next to a known metric keyword.
///
/// The first occurrence per metric name wins.
pub(crate) fn extract_metrics(text: &str) -> Vec<RawMetric> {
    let mut seen: BTreeSet<&'static str> = BTreeSet::new();
    let mut out = Vec::new();
    for rule in metric_rules() {
        if seen.contains(rule.name) {
            continue;
        }
        let Some(caps) = rule.pattern.captures(text) else {
            continue;
        };
        let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
            continue;
        };
        let suffix = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
        let (value, unit) = canonicalize(value, rule.kind, suffix.as_deref());
        seen.insert(rule.name);
        out.push(RawMetric {
            name: rule.name,
            value,
            unit,
        });
    }
    out
}

fn canonicalize(value: f64, kind: UnitKind, suffix: Option<&str>) -> (f64, Option<&'static str>) {
    match kind {
        UnitKind::Percent => (value, Some("%")),
        UnitKind::Millis => match suffix {
            Some("s") => (value * 1000.0, Some("ms")),
            Some("us") => (value / 1000.0, Some("ms")),
            _ => (value, Some("ms")),
        },
        UnitKind::Megabytes => match suffix {
            Some("kb") => (value / 1024.0, Some("MB")),
            Some("gb") => (value * 1024.0, Some("MB")),
            _ => (value, Some("MB")),
        },
        UnitKind::Count => (value, Some("count")),
        UnitKind::Plain => (value, None),
    }
}

/// Canonical unit name for an explicitly reported unit label.
pub(crate) fn canonical_unit(value: f64, unit: &str) -> (f64, Option<String>) {
    let lower = unit.trim().to_ascii_lowercase();
    let (value, unit) = match lower.as_str() {
        "%" | "percent" | "pct" => canonicalize(value, UnitKind::Percent, None),
        "ms" | "s" | "us" | "sec" | "seconds" => {
            let suffix = match lower.as_str() {
                "sec" | "seconds" => "s",
                other => other,
            };
            canonicalize(value, UnitKind::Millis, Some(suffix))
        }
        "kb" | "mb" | "gb" => canonicalize(value, UnitKind::Megabytes, Some(lower.as_str())),
        "" => (value, None),
        _ => return (value, Some(unit.trim().to_string())),
    };
    (value, unit.map(str::to_string))
}

/// Lowercases and collapses whitespace.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits text into semantic units.
pub(crate) fn segment(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    for line in text.lines() {
        let line = strip_marker(line.trim());
        for sentence in split_sentences(line) {
            let sentence = sentence
                .trim()
                .trim_end_matches(['.', '!', '?', ';', ':'])
                .trim();
            if !sentence.is_empty() {
                units.push(sentence.to_string());
            }
        }
    }
    units
}

fn strip_marker(line: &str) -> &str {
    let line = line
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '+' | '>' | '#'))
        .trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        let mut chars = rest.chars();
        if matches!(chars.next(), Some('.' | ')')) && chars.next().is_some_and(char::is_whitespace) {
            return rest[1..].trim_start();
        }
    }
    line
}

fn split_sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();
    for (idx, c) in line.char_indices() {
        if matches!(c, '.' | '!' | '?' | ';') {
            let next = bytes.get(idx + 1).copied();
            if next.map_or(true, |b| b.is_ascii_whitespace()) {
                out.push(&line[start..=idx]);
                start = idx + 1;
            }
        }
    }
    if start < line.len() {
        out.push(&line[start..]);
    }
    out
}

/// Problem unless every issue signal is negated, or there is no issue
/// signal but a health word.
pub(crate) fn polarity_of(tokens: &[String]) -> Polarity {
    let mut saw_issue = false;
    for (idx, token) in tokens.iter().enumerate() {
        if !ISSUE_SIGNALS.contains(&token.as_str()) {
            continue;
        }
        saw_issue = true;
        let window = &tokens[idx.saturating_sub(NEGATION_WINDOW)..idx];
        if !contains_any(window, NEGATIONS) {
            return Polarity::Problem;
        }
    }
    if saw_issue || contains_any(tokens, HEALTH_WORDS) {
        Polarity::Clear
    } else {
        Polarity::Problem
    }
}

fn severity_in(tokens: &[String]) -> Option<FindingSeverity> {
    tokens.iter().find_map(|t| match t.as_str() {
        "critical" | "severe" => Some(FindingSeverity::Critical),
        "high" | "major" => Some(FindingSeverity::High),
        "medium" | "moderate" => Some(FindingSeverity::Medium),
        "minor" => Some(FindingSeverity::Low),
        _ => None,
    })
}

/// Normalized finding key: content tokens without health words.
pub(crate) fn finding_key(tokens: &[String], fallback: &str) -> String {
    let key: Vec<String> = content_tokens(tokens)
        .into_iter()
        .filter(|t| !HEALTH_WORDS.contains(&t.as_str()))
        .collect();
    if key.is_empty() {
        normalize(fallback)
    } else {
        key.join(" ")
    }
}

pub(crate) fn build_finding(unit: &str, tokens: &[String], source: &EngineId) -> Finding {
    Finding {
        category: dominant_category(tokens),
        text: unit.to_string(),
        source: source.clone(),
        polarity: polarity_of(tokens),
        severity: severity_in(tokens),
        key: finding_key(tokens, unit),
    }
}

pub(crate) fn build_recommendation(unit: &str, tokens: &[String], source: &EngineId) -> Recommendation {
    Recommendation {
        category: dominant_category(tokens),
        text: unit.to_string(),
        source: source.clone(),
        action: tokens.iter().find_map(|t| action_of(t)).map(str::to_string),
        subject: content_tokens(tokens).into_iter().collect(),
    }
}

/// Classifies one unit.
pub(crate) fn classify_unit(unit: &str, source: &EngineId) -> Unit {
    let tokens = tokenize(unit);
    let Some(first) = tokens.first() else {
        return Unit::Plain;
    };
    let len = unit.chars().count();

    let recommends =
        IMPERATIVES.contains(&first.as_str()) || contains_any(&tokens, SUGGESTION_WORDS);
    if recommends && len >= MIN_RECOMMENDATION_LEN {
        return Unit::Recommendation(build_recommendation(unit, &tokens, source));
    }

    let has_issue = contains_any(&tokens, ISSUE_SIGNALS);
    let has_health = contains_any(&tokens, HEALTH_WORDS);
    let touches_domain = dominant_category(&tokens) != crate::pattern::Category::General;
    if (has_issue || (has_health && touches_domain)) && len >= MIN_FINDING_LEN {
        return Unit::Finding(build_finding(unit, &tokens, source));
    }

    Unit::Plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Category;

    fn engine() -> EngineId {
        EngineId::new("a")
    }

    #[test]
    fn segment_strips_bullets_and_splits_sentences() {
        let units = segment("- First issue found. Second one!\n2. Numbered item\n\n* last");
        assert_eq!(units, vec!["First issue found", "Second one", "Numbered item", "last"]);
    }

    #[test]
    fn segment_keeps_decimals_intact() {
        let units = segment("coverage: 85.5% overall");
        assert_eq!(units, vec!["coverage: 85.5% overall"]);
    }

    #[test]
    fn negated_issue_is_clear() {
        let Unit::Finding(f) = classify_unit("No security issues found", &engine()) else {
            panic!("expected finding");
        };
        assert_eq!(f.polarity, Polarity::Clear);
        assert_eq!(f.category, Category::Security);
    }

    #[test]
    fn affirmed_issue_is_problem() {
        let Unit::Finding(f) = classify_unit("SQL injection vulnerability in login handler", &engine())
        else {
            panic!("expected finding");
        };
        assert_eq!(f.polarity, Polarity::Problem);
        assert_eq!(f.category, Category::Security);
    }

    #[test]
    fn imperative_unit_is_recommendation() {
        let Unit::Recommendation(r) = classify_unit("avoid synchronous I/O — causes blocking", &engine())
        else {
            panic!("expected recommendation");
        };
        assert_eq!(r.action.as_deref(), Some("avoid"));
        assert_eq!(r.category, Category::Performance);
        assert!(r.subject.contains("i/o"));
    }

    #[test]
    fn plain_statement_is_not_classified() {
        assert_eq!(classify_unit("coverage: 85%", &engine()), Unit::Plain);
        assert_eq!(classify_unit("", &engine()), Unit::Plain);
    }

    #[test]
    fn metrics_are_canonicalized() {
        let metrics = extract_metrics("Coverage: 85.5%, p95 latency 1.2s, memory 2 GB, 3 errors");
        let by_name = |n: &str| metrics.iter().find(|m| m.name == n).cloned().unwrap();
        assert_eq!(by_name("coverage").value, 85.5);
        assert!((by_name("latency").value - 1200.0).abs() < 1e-9);
        assert_eq!(by_name("latency").unit, Some("ms"));
        assert_eq!(by_name("memory").value, 2048.0);
        assert_eq!(by_name("errors").value, 3.0);
    }

    #[test]
    fn metric_requires_keyword() {
        assert!(extract_metrics("took 40 ms").is_empty());
    }
}
