//! # crosscheck - Cross-Engine Correlation and Conflict Resolution
//!
//! crosscheck takes the results of several independent analysis engines for
//! the same subject and works out where they agree, where they disagree, and
//! which answer to trust when they disagree.
//!
//! ## Core Concepts
//!
//! - **Pattern**: Findings, metrics, recommendations and categories extracted from one engine result
//! - **Correlation**: A pairwise relation (confirms, complements, contradicts) with strength and evidence
//! - **Conflict**: A disagreement on one metric, finding or recommendation among two or more engines
//! - **Resolution**: The answer a strategy settles on, with confidence and rationale
//! - **Bundle**: Correlations, conflicts and resolutions of one run
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crosscheck::{CorrelationConfig, CorrelationRuntime, EngineResult};
//!
//! let runtime = CorrelationRuntime::new(CorrelationConfig::from_env()?)?;
//! let outcome = runtime
//!     .correlate(vec![
//!         EngineResult::text("security_audit", "No security issues found"),
//!         EngineResult::text("code_review", "SQL injection vulnerability in login handler"),
//!     ])
//!     .await?;
//! println!("{}", outcome.bundle.summary());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// Inputs and extracted patterns
pub mod error;
pub mod extract;
pub mod input;
pub mod pattern;

// Scoring and comparison
pub mod confidence;
pub mod expertise;
pub mod similarity;

// Pipeline stages
pub mod conflict;
pub mod correlation;
pub mod resolution;

// Composition and execution
pub mod bundle;
pub mod cache;
pub mod config;
pub mod pipeline;
pub mod runtime;

// Re-export primary types at crate root for convenience
pub use bundle::Bundle;
pub use cache::{CacheKey, CacheStats, CorrelationCache};
pub use confidence::{ConfidenceScorer, ScoreFactors};
pub use config::{CorrelationConfig, DisplayLimits, SimilarityWeights};
pub use conflict::{Conflict, ConflictId, ConflictIdentifier, ConflictType, ConflictValue, Severity};
pub use correlation::{Correlation, CorrelationDetector, Evidence, Relation, StrengthBand};
pub use error::{ConfigError, CorrelateError, CorrelateResult, ExecutionError};
pub use expertise::ExpertiseTable;
pub use extract::{KeywordExtractor, PatternExtractor};
pub use input::{EngineId, EngineResult, Payload};
pub use pattern::{Category, EnginePattern, Finding, Metric, Polarity, Recommendation};
pub use pipeline::Pipeline;
pub use resolution::{
	Resolution, ResolutionContext, ResolutionEngine, ResolvedValue, Strategy, StrategySelector,
};
pub use runtime::{CorrelationOutcome, CorrelationRuntime, OutcomeSource};
