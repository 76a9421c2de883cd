//! Engine results as supplied by the orchestration layer.
//!
//! An engine result is either free text or a structured JSON object, plus
//! optional explicitly named metrics. Results live for one call and are
//! never persisted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an analysis engine.
///
/// Engine ids are totally ordered by their string value; every pairwise
/// computation iterates engines in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Creates an engine id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EngineId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Raw output of one engine.
///
/// The discriminant field `kind` selects the extraction path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Free text, segmented and classified by keyword matching.
    Text {
        /// The text body.
        text: String,
    },

    /// Pre-structured fields parsed directly.
    Structured {
        /// Top-level JSON object.
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

impl Payload {
    /// Returns true for [`Payload::Structured`].
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }

    /// Builds a structured payload from any JSON value.
    ///
    /// Non-object values are wrapped under a `value` field so that scalar
    /// or array outputs still go through the structured path.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(fields) => Self::Structured { fields },
            serde_json::Value::String(text) => Self::Text { text },
            other => {
                let mut fields = serde_json::Map::new();
                fields.insert("value".to_string(), other);
                Self::Structured { fields }
            }
        }
    }
}

/// One engine's result for a single correlation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    /// Which engine produced this result.
    pub engine: EngineId,

    /// Text and/or structured content.
    pub payload: Payload,

    /// Explicitly reported metrics. These override metrics extracted
    /// from the payload under the same name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    /// When the engine produced the result. Not part of the content identity.
    pub timestamp: DateTime<Utc>,
}

impl EngineResult {
    /// Creates a free-text result stamped with the current time.
    #[must_use]
    pub fn text(engine: impl Into<EngineId>, text: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            payload: Payload::Text { text: text.into() },
            metrics: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a structured result stamped with the current time.
    #[must_use]
    pub fn structured(engine: impl Into<EngineId>, value: serde_json::Value) -> Self {
        Self {
            engine: engine.into(),
            payload: Payload::from_json(value),
            metrics: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds an explicitly reported metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_ids_order_lexically() {
        let mut ids = vec![EngineId::new("zeta"), EngineId::new("alpha"), EngineId::new("mid")];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(EngineId::as_str).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = Payload::Text {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "text");
    }

    #[test]
    fn from_json_wraps_non_objects() {
        let payload = Payload::from_json(serde_json::json!([1, 2, 3]));
        let Payload::Structured { fields } = payload else {
            panic!("expected structured payload");
        };
        assert!(fields.contains_key("value"));

        let text = Payload::from_json(serde_json::json!("plain"));
        assert!(!text.is_structured());
    }
}
