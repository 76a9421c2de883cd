//! Fixed keyword vocabulary used by the extractor.
//!
//! All matching is done on lowercase tokens. A keyword of five or more
//! characters also matches tokens it prefixes (`vulnerab` style stems are
//! spelled out instead to keep matches predictable).

use crate::pattern::Category;

pub(crate) const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Security,
        &[
            "security", "secure", "insecure", "vulnerability", "vulnerabilities", "vulnerable",
            "exploit", "injection", "xss", "csrf", "authentication", "authorization", "auth",
            "password", "secret", "secrets", "encryption", "crypto", "ssl", "tls",
            "certificate", "cve", "sanitize", "sanitization",
        ],
    ),
    (
        Category::Performance,
        &[
            "performance", "slow", "fast", "latency", "bottleneck", "speed", "memory", "cpu",
            "leak", "leaks", "throughput", "optimization", "optimize", "cache", "caching", "blocking",
            "synchronous", "asynchronous", "async", "i/o", "io", "allocation", "allocations",
        ],
    ),
    (
        Category::Quality,
        &[
            "bug", "bugs", "defect", "quality", "maintainability", "readability", "complexity",
            "smell", "duplication", "duplicate", "lint", "refactor", "readable",
        ],
    ),
    (
        Category::Testing,
        &[
            "test", "tests", "testing", "coverage", "assertion", "assertions", "mock", "mocks",
            "unit", "e2e", "untested", "uncovered",
        ],
    ),
    (
        Category::Architecture,
        &[
            "architecture", "design", "structure", "component", "components", "module",
            "modules", "layering", "layer", "layers", "monolith",
        ],
    ),
    (
        Category::Database,
        &[
            "database", "sql", "query", "queries", "schema", "index", "indexes", "migration",
            "migrations", "table", "tables", "transaction",
        ],
    ),
    (
        Category::Api,
        &[
            "api", "endpoint", "endpoints", "contract", "contracts", "rest", "graphql",
            "request", "response", "payload",
        ],
    ),
    (
        Category::Dependencies,
        &[
            "dependency", "dependencies", "package", "packages", "outdated", "coupling",
            "coupled", "imports", "version",
        ],
    ),
    (
        Category::Configuration,
        &[
            "config", "configuration", "setting", "settings", "environment", "deployment",
            "yaml", "toml", "env",
        ],
    ),
    (
        Category::Documentation,
        &["documentation", "docs", "docstring", "docstrings", "comment", "comments", "readme"],
    ),
];

/// Tokens signalling that a unit reports an issue.
pub(crate) const ISSUE_SIGNALS: &[&str] = &[
    "issue", "issues", "problem", "problems", "vulnerability", "vulnerabilities", "vulnerable",
    "error", "errors", "bug", "bugs", "defect", "defects", "leak", "leaks", "bottleneck",
    "bottlenecks", "warning", "warnings", "failure", "failures", "fails", "failing", "broken",
    "missing", "insecure", "slow", "injection", "exploit", "crash", "crashes", "deprecated",
    "outdated", "smell", "smells", "uncovered", "untested", "violation", "violations", "risk",
    "poor", "inefficient",
];

/// Tokens describing a healthy state.
pub(crate) const HEALTH_WORDS: &[&str] = &[
    "secure", "fast", "clean", "healthy", "passes", "passed", "passing", "good", "excellent",
    "adequate", "sufficient", "ok", "compliant", "efficient",
];

/// Negation markers. A negation within three tokens before an issue
/// signal flips the unit to a clear claim.
pub(crate) const NEGATIONS: &[&str] = &[
    "no", "none", "zero", "0", "without", "not", "never", "nothing", "free",
];

/// Leading words that make a unit a recommendation.
pub(crate) const IMPERATIVES: &[&str] = &[
    "use", "avoid", "add", "remove", "enable", "disable", "increase", "decrease", "prefer",
    "replace", "switch", "upgrade", "refactor", "consider", "ensure", "expand", "reduce",
    "optimize", "simplify", "implement", "introduce", "migrate", "split", "extract",
    "validate", "sanitize", "document",
];

/// Tokens anywhere in a unit that make it a recommendation.
pub(crate) const SUGGESTION_WORDS: &[&str] = &[
    "recommend", "recommended", "recommends", "recommendation", "recommendations", "suggest",
    "suggests", "suggested", "suggestion", "suggestions", "should",
];

/// Mutually exclusive actions.
pub(crate) const OPPOSING_ACTIONS: &[(&str, &str)] = &[
    ("use", "avoid"),
    ("increase", "decrease"),
    ("add", "remove"),
    ("enable", "disable"),
    ("expand", "reduce"),
    ("optimize", "simplify"),
];

pub(crate) const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "for", "to", "of", "in", "on", "at", "by", "with", "is",
    "are", "be", "it", "this", "that", "as", "from", "we", "you", "your", "our", "its", "was",
    "were", "has", "have", "can", "could", "may", "might", "will", "would", "more", "less",
    "all", "any", "some", "been", "into", "than", "then", "so", "found", "detected",
    "identified",
];

/// Splits text into lowercase tokens. `/` is kept inside tokens so that
/// `I/O` survives as one token.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '/'))
        .map(|t| t.trim_matches('/'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn keyword_matches(token: &str, keyword: &str) -> bool {
    token == keyword || (keyword.len() >= 5 && token.starts_with(keyword))
}

pub(crate) fn contains_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

/// Categories touched by the tokens, in vocabulary order.
pub(crate) fn categories_of(tokens: &[String]) -> Vec<Category> {
    CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| {
            tokens
                .iter()
                .any(|t| keywords.iter().any(|k| keyword_matches(t, k)))
        })
        .map(|(category, _)| *category)
        .collect()
}

/// The dominant category of a unit: most keyword hits, earliest in the
/// vocabulary on ties, `General` when nothing matches.
pub(crate) fn dominant_category(tokens: &[String]) -> Category {
    let mut best = Category::General;
    let mut best_hits = 0usize;
    for (category, keywords) in CATEGORY_KEYWORDS {
        let hits = tokens
            .iter()
            .filter(|t| keywords.iter().any(|k| keyword_matches(t, k)))
            .count();
        if hits > best_hits {
            best = *category;
            best_hits = hits;
        }
    }
    best
}

/// Normalizes an inflected token to its opposing-action verb.
pub(crate) fn action_of(token: &str) -> Option<&'static str> {
    let action = match token {
        "use" | "uses" | "using" | "utilize" => "use",
        "avoid" | "avoids" | "avoiding" => "avoid",
        "increase" | "increases" | "increasing" | "raise" => "increase",
        "decrease" | "decreases" | "decreasing" | "lower" => "decrease",
        "add" | "adds" | "adding" | "introduce" => "add",
        "remove" | "removes" | "removing" | "drop" | "delete" => "remove",
        "enable" | "enables" | "enabling" => "enable",
        "disable" | "disables" | "disabling" => "disable",
        "expand" | "expands" | "expanding" | "grow" => "expand",
        "reduce" | "reduces" | "reducing" | "shrink" => "reduce",
        "optimize" | "optimizes" | "optimizing" | "optimise" => "optimize",
        "simplify" | "simplifies" | "simplifying" => "simplify",
        _ => return None,
    };
    Some(action)
}

/// Returns true when two action verbs are mutually exclusive.
pub(crate) fn actions_oppose(a: &str, b: &str) -> bool {
    OPPOSING_ACTIONS
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

/// Content tokens: no stopwords, action verbs, suggestion or polarity words.
pub(crate) fn content_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| {
            let t = t.as_str();
            (t.len() > 2 || t.contains('/'))
                && !STOPWORDS.contains(&t)
                && !NEGATIONS.contains(&t)
                && !SUGGESTION_WORDS.contains(&t)
                && action_of(t).is_none()
                && !IMPERATIVES.contains(&t)
        })
        .cloned()
        .collect()
}

/// Words that name the whole subject rather than a specific part of it.
const SCOPE_WORDS: &[&str] = &[
    "code", "codebase", "project", "overall", "application", "repository", "system",
];

/// A blanket claim names no specific subject: its key holds nothing but
/// category keywords, issue signals and scope words ("no security issues").
pub(crate) fn is_blanket_key(key: &str) -> bool {
    tokenize(key).iter().all(|t| {
        ISSUE_SIGNALS.contains(&t.as_str())
            || SCOPE_WORDS.contains(&t.as_str())
            || !categories_of(std::slice::from_ref(t)).is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_io_together() {
        let tokens = tokenize("Avoid synchronous I/O — causes blocking.");
        assert_eq!(tokens, vec!["avoid", "synchronous", "i/o", "causes", "blocking"]);
    }

    #[test]
    fn dominant_category_prefers_most_hits() {
        let tokens = tokenize("sql injection vulnerability in login");
        assert_eq!(dominant_category(&tokens), Category::Security);
        assert_eq!(dominant_category(&tokenize("lorem ipsum")), Category::General);
    }

    #[test]
    fn actions_normalize_and_oppose() {
        assert_eq!(action_of("using"), Some("use"));
        assert!(actions_oppose("use", "avoid"));
        assert!(actions_oppose("disable", "enable"));
        assert!(!actions_oppose("use", "add"));
    }

    #[test]
    fn content_tokens_strip_function_words() {
        let tokens = tokenize("use synchronous I/O for simplicity");
        assert_eq!(content_tokens(&tokens), vec!["synchronous", "i/o", "simplicity"]);
    }

    #[test]
    fn blanket_keys_name_no_specific_subject() {
        assert!(is_blanket_key("security issues"));
        assert!(is_blanket_key("vulnerabilities codebase"));
        assert!(!is_blanket_key("sql injection login handler"));
    }
}
