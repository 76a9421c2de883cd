//! Similarity measures shared by the detector, identifier and strategies.

use std::collections::BTreeSet;

/// Normalized Levenshtein ratio in [0, 1]; 1.0 for identical strings.
#[must_use]
pub fn text_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b).clamp(0.0, 1.0)
}

/// Jaccard index of two sets; `None` when both are empty.
#[must_use]
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Option<f64> {
    let union = a.union(b).count();
    if union == 0 {
        return None;
    }
    let intersection = a.intersection(b).count();
    Some(intersection as f64 / union as f64)
}

/// Relative difference `|a - b| / mean(|a|, |b|)`; 0.0 when both are zero.
///
/// Ranges over [0, 2]; 2.0 when the values have opposite signs or one is zero.
#[must_use]
pub fn relative_gap(a: f64, b: f64) -> f64 {
    let scale = (a.abs() + b.abs()) / 2.0;
    if scale == 0.0 {
        return 0.0;
    }
    ((a - b).abs() / scale).min(2.0)
}

/// Agreement of two metric values in [0, 1].
#[must_use]
pub fn metric_agreement(a: f64, b: f64) -> f64 {
    1.0 - relative_gap(a, b).min(1.0)
}

/// Prefix of at most `max_chars` chars.
#[must_use]
pub fn char_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
