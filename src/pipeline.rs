//! Pipeline orchestration
//!
//! Runs the full batch computation over one cohort:
//! raw rows → normalization → per-user features (full and week-1) → composite
//! scores → tiers → churn dataset, and optionally churn model training.

use crate::agent::SuccessScoringAgent;
use crate::churn::{
    compare_full_vs_week1, train_and_compare, ChurnDataset, ModelComparison, WindowComparison,
};
use crate::config::PipelineConfig;
use crate::encoder::CohortEncoder;
use crate::error::SignalError;
use crate::features::FeatureExtractor;
use crate::normalizer::{EventNormalizer, NormalizationReport};
use crate::schema::{RawEvent, RawEventAdapter};
use crate::scoring::CompositeScorer;
use crate::tiers::{summarize_tiers, TierSummary, TierThresholds};
use crate::types::{Event, ScoredUser, UserFeatureVector, Window};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Everything one pipeline run produces, before model training
#[derive(Debug, Clone)]
pub struct CohortRun {
    pub report: NormalizationReport,
    pub events: Vec<Event>,
    /// Full-history vectors, ordered by user id
    pub features: Vec<UserFeatureVector>,
    /// Week-1 vectors, ordered by user id
    pub week1_features: Vec<UserFeatureVector>,
    /// Full-history features with scores and tiers, ordered by user id
    pub scored: Vec<ScoredUser>,
    pub thresholds: TierThresholds,
    pub tier_summary: Vec<TierSummary>,
    pub churn_dataset: ChurnDataset,
}

impl CohortRun {
    /// Query facade over this run's scored users
    pub fn agent(&self) -> SuccessScoringAgent {
        SuccessScoringAgent::new(self.scored.clone())
    }
}

/// Held-out prediction for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnPrediction {
    pub user_id: String,
    pub probability: f64,
    pub predicted: u8,
    pub actual: u8,
}

/// Result of churn model training on a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnReport {
    pub comparison: ModelComparison,
    pub window_comparison: WindowComparison,
    /// Best model's predictions on its held-out users
    pub predictions: Vec<ChurnPrediction>,
}

/// Batch pipeline over one cohort
pub struct CohortPipeline {
    config: PipelineConfig,
}

impl Default for CohortPipeline {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }
}

impl CohortPipeline {
    /// Create a pipeline; the configuration is validated first
    pub fn new(config: PipelineConfig) -> Result<Self, SignalError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parse a JSON array or NDJSON export and run the pipeline on it
    pub fn run_json(&self, input: &str) -> Result<CohortRun, SignalError> {
        let raw = RawEventAdapter::parse(input)?;
        self.run(&raw)
    }

    /// Run every stage up to the churn dataset
    pub fn run(&self, raw: &[RawEvent]) -> Result<CohortRun, SignalError> {
        let config = &self.config;

        // Stage 1: columns and normalization
        if !raw.is_empty() {
            RawEventAdapter::column_presence(raw).ensure_usable(&config.normalizer.user_id_columns)?;
        }
        let normalized = EventNormalizer::new(&config.normalizer).normalize(raw);
        let report = normalized.report;
        info!(
            rows = report.total_rows,
            kept = report.kept_rows,
            dropped = report.dropped_rows(),
            "normalized raw events"
        );
        if normalized.events.is_empty() {
            return Err(SignalError::EmptyCohort(format!(
                "no usable events among {} rows",
                report.total_rows
            )));
        }

        // Stage 2: per-user features for both windows
        let extractor = FeatureExtractor::new(&config.features);
        let features = extractor.extract_cohort(&normalized.events, Window::Full);
        let week1_features = extractor.extract_cohort(
            &normalized.events,
            Window::Early {
                days: config.features.window_days,
            },
        );

        // Stage 3: scores and tiers
        let scores = CompositeScorer::new(config.scoring.clone()).score_cohort(&features);
        let composites: Vec<f64> = scores.iter().map(|s| s.composite_success_score).collect();
        let thresholds = TierThresholds::from_scores(&composites, &config.tiers)?;
        debug!(?thresholds, "computed tier thresholds");

        let scored: Vec<ScoredUser> = features
            .iter()
            .zip(&scores)
            .map(|(v, s)| ScoredUser {
                features: v.clone(),
                scores: *s,
                tier: thresholds.classify(s.composite_success_score),
            })
            .collect();
        let tier_summary = summarize_tiers(&scored);

        // Stage 4: week-1 churn labels
        let churn_dataset = ChurnDataset::build(&week1_features, &scored);
        info!(
            users = scored.len(),
            churn_rows = churn_dataset.len(),
            churn_rate = churn_dataset.churn_rate(),
            "scored cohort"
        );

        Ok(CohortRun {
            report,
            events: normalized.events,
            features,
            week1_features,
            scored,
            thresholds,
            tier_summary,
            churn_dataset,
        })
    }

    /// Train the configured churn models on a run's week-1 dataset
    pub fn train_churn(&self, run: &CohortRun) -> Result<ChurnReport, SignalError> {
        let churn = &self.config.churn;
        let (comparison, best) = train_and_compare(&run.churn_dataset, churn)?;
        let window_comparison =
            compare_full_vs_week1(&run.churn_dataset, &run.scored, best.evaluation.kind, churn)?;

        let labels: HashMap<&str, u8> = run
            .churn_dataset
            .records
            .iter()
            .map(|r| (r.user_id.as_str(), r.churned))
            .collect();
        let predictions = best
            .test_user_ids
            .iter()
            .zip(&best.test_probabilities)
            .map(|(user_id, &probability)| ChurnPrediction {
                user_id: user_id.clone(),
                probability,
                predicted: u8::from(probability >= 0.5),
                actual: labels.get(user_id.as_str()).copied().unwrap_or_default(),
            })
            .collect();

        Ok(ChurnReport {
            comparison,
            window_comparison,
            predictions,
        })
    }
}

/// Score a JSON array or NDJSON export with default settings
///
/// # Returns
/// The encoded cohort payload as pretty JSON
///
/// # Example
/// ```ignore
/// let payload = score_events_json(export_ndjson)?;
/// ```
pub fn score_events_json(input: &str) -> Result<String, SignalError> {
    let run = CohortPipeline::default().run_json(input)?;
    CohortEncoder::new().encode_to_json(&run)
}
