//! Structured-payload extraction path.
//!
//! Known top-level fields are parsed directly; every other string leaf is
//! handed back to the free-text path.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::text::{
    build_finding, build_recommendation, canonical_unit, MIN_FINDING_LEN, MIN_RECOMMENDATION_LEN,
};
use super::{canonical_metric_name, is_known_metric, Collected};
use crate::extract::vocabulary::tokenize;
use crate::input::EngineId;
use crate::pattern::{Category, FindingSeverity, Metric, Polarity};

/// Nesting depth beyond which string leaves are ignored.
const MAX_DEPTH: usize = 32;

const TEXT_FIELDS: &[&str] = &["text", "message", "description", "title", "summary"];
const CATEGORY_FIELDS: &[&str] = &["category", "domain", "type"];
const SEVERITY_FIELDS: &[&str] = &["severity", "level"];

/// Recovered locally: a malformed field is skipped, never surfaced.
#[derive(Debug, Error)]
pub(crate) enum ExtractionError {
    #[error("field '{field}' has unexpected shape: expected {expected}")]
    UnexpectedShape {
        field: String,
        expected: &'static str,
    },

    #[error("entry in '{field}' carries no text")]
    MissingText { field: String },
}

fn shape(field: &str, expected: &'static str) -> ExtractionError {
    ExtractionError::UnexpectedShape {
        field: field.to_string(),
        expected,
    }
}

/// Walks the top-level fields of a structured payload into `out`.
pub(crate) fn collect(fields: &Map<String, Value>, source: &EngineId, out: &mut Collected) {
    for (key, value) in fields {
        let result = match key.to_ascii_lowercase().as_str() {
            "findings" | "issues" | "problems" => findings(key, value, source, out),
            "recommendations" | "suggestions" => recommendations(key, value, source, out),
            "metrics" | "measurements" => metrics(key, value, source, out),
            "categories" | "tags" | "domains" => categories(key, value, out),
            _ => {
                other(key, value, source, out);
                Ok(())
            }
        };
        if let Err(err) = result {
            debug!(engine = %source, error = %err, "skipping structured field");
        }
    }
}

fn other(key: &str, value: &Value, source: &EngineId, out: &mut Collected) {
    if let Some(number) = value.as_f64() {
        let name = canonical_metric_name(key);
        if is_known_metric(&name) {
            insert_metric(out, name, number, None, source);
        }
        return;
    }
    walk_strings(value, 0, out);
}

fn walk_strings(value: &Value, depth: usize, out: &mut Collected) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.text.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                walk_strings(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk_strings(item, depth + 1, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn first_str<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| object.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn insert_metric(
    out: &mut Collected,
    name: String,
    value: f64,
    unit: Option<&str>,
    source: &EngineId,
) {
    if !value.is_finite() {
        return;
    }
    let (value, unit) = match unit {
        Some(unit) => canonical_unit(value, unit),
        None => (value, None),
    };
    out.metrics.entry(name.clone()).or_insert(Metric {
        name,
        value,
        unit,
        source: source.clone(),
    });
}

fn findings(
    field: &str,
    value: &Value,
    source: &EngineId,
    out: &mut Collected,
) -> Result<(), ExtractionError> {
    match value {
        Value::Array(items) => {
            for item in items {
                let parsed = match item {
                    Value::String(s) => {
                        push_finding(s, None, None, None, source, out);
                        Ok(())
                    }
                    Value::Object(object) => finding_object(field, object, source, out),
                    _ => Err(shape(field, "string or object entries")),
                };
                if let Err(err) = parsed {
                    debug!(engine = %source, error = %err, "skipping finding entry");
                }
            }
            Ok(())
        }
        Value::String(s) => {
            out.text.push(s.clone());
            Ok(())
        }
        Value::Number(n) => {
            if let Some(count) = n.as_f64() {
                insert_metric(out, canonical_metric_name(field), count, Some("count"), source);
            }
            Ok(())
        }
        Value::Null => Ok(()),
        _ => Err(shape(field, "array of findings")),
    }
}

fn finding_object(
    field: &str,
    object: &Map<String, Value>,
    source: &EngineId,
    out: &mut Collected,
) -> Result<(), ExtractionError> {
    let text = first_str(object, TEXT_FIELDS).ok_or_else(|| ExtractionError::MissingText {
        field: field.to_string(),
    })?;
    let category = first_str(object, CATEGORY_FIELDS).map(Category::parse_lenient);
    let severity = first_str(object, SEVERITY_FIELDS).and_then(FindingSeverity::parse);
    let polarity = object
        .get("polarity")
        .or_else(|| object.get("status"))
        .and_then(Value::as_str)
        .and_then(|p| match p.trim().to_ascii_lowercase().as_str() {
            "clear" | "pass" | "passed" | "ok" | "resolved" => Some(Polarity::Clear),
            "problem" | "fail" | "failed" | "open" => Some(Polarity::Problem),
            _ => None,
        });
    push_finding(text, category, severity, polarity, source, out);
    Ok(())
}

fn push_finding(
    text: &str,
    category: Option<Category>,
    severity: Option<FindingSeverity>,
    polarity: Option<Polarity>,
    source: &EngineId,
    out: &mut Collected,
) {
    let text = text.trim();
    if text.chars().count() < MIN_FINDING_LEN {
        return;
    }
    let tokens = tokenize(text);
    let mut finding = build_finding(text, &tokens, source);
    if let Some(category) = category.filter(|c| *c != Category::General) {
        finding.category = category;
    }
    if severity.is_some() {
        finding.severity = severity;
    }
    if let Some(polarity) = polarity {
        finding.polarity = polarity;
    }
    out.classified_text.push(text.to_string());
    out.findings.push(finding);
}

fn recommendations(
    field: &str,
    value: &Value,
    source: &EngineId,
    out: &mut Collected,
) -> Result<(), ExtractionError> {
    let Value::Array(items) = value else {
        if let Value::String(s) = value {
            out.text.push(s.clone());
            return Ok(());
        }
        return Err(shape(field, "array of recommendations"));
    };
    for item in items {
        let (text, category) = match item {
            Value::String(s) => (s.trim(), None),
            Value::Object(object) => match first_str(object, TEXT_FIELDS) {
                Some(text) => (
                    text,
                    first_str(object, CATEGORY_FIELDS).map(Category::parse_lenient),
                ),
                None => {
                    debug!(engine = %source, field, "recommendation entry without text");
                    continue;
                }
            },
            _ => {
                debug!(engine = %source, field, "recommendation entry has unexpected shape");
                continue;
            }
        };
        let text = text.trim();
        if text.chars().count() < MIN_RECOMMENDATION_LEN {
            continue;
        }
        let tokens = tokenize(text);
        let mut rec = build_recommendation(text, &tokens, source);
        if let Some(category) = category.filter(|c| *c != Category::General) {
            rec.category = category;
        }
        out.classified_text.push(text.to_string());
        out.recommendations.push(rec);
    }
    Ok(())
}

fn metrics(
    field: &str,
    value: &Value,
    source: &EngineId,
    out: &mut Collected,
) -> Result<(), ExtractionError> {
    let Value::Object(map) = value else {
        return Err(shape(field, "object of named metrics"));
    };
    for (name, entry) in map {
        let name = canonical_metric_name(name);
        match entry {
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    insert_metric(out, name, v, None, source);
                }
            }
            Value::Object(object) => {
                let Some(v) = object.get("value").and_then(Value::as_f64) else {
                    debug!(engine = %source, metric = %name, "metric entry without numeric value");
                    continue;
                };
                let unit = object.get("unit").and_then(Value::as_str);
                insert_metric(out, name, v, unit, source);
            }
            _ => debug!(engine = %source, metric = %name, "metric entry is not numeric"),
        }
    }
    Ok(())
}

fn categories(field: &str, value: &Value, out: &mut Collected) -> Result<(), ExtractionError> {
    let Value::Array(items) = value else {
        return Err(shape(field, "array of category names"));
    };
    out.categories.extend(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(Category::parse_lenient)
            .filter(|c| *c != Category::General),
    );
    Ok(())
}
