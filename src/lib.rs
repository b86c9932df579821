//! Cohort Signals - Batch engine for product-analytics success signals
//!
//! Cohort Signals turns a raw event export into per-user success signals through
//! a deterministic pipeline: event normalization → feature extraction (full
//! history and first week) → composite scoring → percentile tiers → week-1
//! churn labels → churn model training.
//!
//! ## Modules
//!
//! - **Pipeline**: Run every stage over one cohort and encode the results
//! - **Churn**: Label, split, scale and train early churn predictors
//! - **Agent**: Query scores, risk levels and recommendations per user
//! - **Insights**: Credit bands, workflow transitions and early-behavior correlations

pub mod agent;
pub mod churn;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod insights;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod scoring;
pub mod tiers;
pub mod types;

#[cfg(feature = "cli")]
pub mod logging;

pub use agent::{RiskLevel, ScoreRecord, SuccessScoringAgent};
pub use config::PipelineConfig;
pub use encoder::CohortEncoder;
pub use error::SignalError;
pub use pipeline::{score_events_json, CohortPipeline, CohortRun};
pub use tiers::TierThresholds;
pub use types::{ScoredUser, Tier, UserFeatureVector};

// Schema exports
pub use schema::{RawEvent, RawEventAdapter, SCHEMA_VERSION};

/// Crate version embedded in all payloads
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for cohort payloads
pub const PRODUCER_NAME: &str = "cohort-signals";
