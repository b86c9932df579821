//! Cohort payload encoding
//!
//! Serializes a pipeline run into versioned JSON payloads with producer and
//! provenance metadata: one for the scored cohort and one for the week-1 churn
//! dataset.

use crate::churn::ChurnDataset;
use crate::error::SignalError;
use crate::pipeline::{ChurnReport, CohortRun};
use crate::schema::SCHEMA_VERSION;
use crate::tiers::{TierSummary, TierThresholds};
use crate::types::{CompositeScore, Tier, UserFeatureVector};
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current cohort payload version
pub const PAYLOAD_VERSION: &str = "cohort.signals.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub input_schema: String,
    pub computed_at_utc: String,
    pub first_event_utc: Option<String>,
    pub last_event_utc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub dropped_missing_user: usize,
    pub dropped_bad_timestamp: usize,
    pub dropped_missing_event: usize,
    /// Kept rows over total rows (0-1)
    pub coverage: f64,
    pub flags: Vec<String>,
}

/// One scored user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub tier: Tier,
    pub scores: CompositeScore,
    pub features: UserFeatureVector,
}

/// Scored cohort payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortPayload {
    pub payload_version: String,
    pub producer: Producer,
    pub provenance: Provenance,
    pub quality: Quality,
    pub thresholds: TierThresholds,
    pub tier_summary: Vec<TierSummary>,
    pub users: Vec<UserRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnRow {
    pub user_id: String,
    /// Values in `columns` order
    pub values: Vec<f64>,
    pub churned: u8,
    pub final_tier: Tier,
}

/// Week-1 churn dataset payload, optionally with training results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnPayload {
    pub payload_version: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub columns: Vec<String>,
    pub churn_rate: f64,
    pub rows: Vec<ChurnRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<ChurnReport>,
}

/// Encoder for cohort payloads
pub struct CohortEncoder {
    instance_id: String,
}

impl Default for CohortEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CohortEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        }
    }

    /// Encode a run into a cohort payload
    pub fn encode(&self, run: &CohortRun) -> Result<CohortPayload, SignalError> {
        if run.scored.is_empty() {
            return Err(SignalError::EncodingError("run has no scored users".to_string()));
        }

        let provenance = Provenance {
            input_schema: SCHEMA_VERSION.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            first_event_utc: run.events.iter().map(|e| e.timestamp).min().map(|t| t.to_rfc3339()),
            last_event_utc: run.events.iter().map(|e| e.timestamp).max().map(|t| t.to_rfc3339()),
        };

        let users = run
            .scored
            .iter()
            .map(|u| UserRow {
                user_id: u.user_id().to_string(),
                tier: u.tier,
                scores: u.scores,
                features: u.features.clone(),
            })
            .collect();

        Ok(CohortPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            provenance,
            quality: self.build_quality(run),
            thresholds: run.thresholds,
            tier_summary: run.tier_summary.clone(),
            users,
        })
    }

    /// Encode to pretty JSON
    pub fn encode_to_json(&self, run: &CohortRun) -> Result<String, SignalError> {
        let payload = self.encode(run)?;
        serde_json::to_string_pretty(&payload).map_err(SignalError::JsonError)
    }

    /// Encode a churn dataset with `w1_`-prefixed columns
    pub fn encode_churn(
        &self,
        dataset: &ChurnDataset,
        training: Option<&ChurnReport>,
    ) -> Result<ChurnPayload, SignalError> {
        let values = dataset.feature_matrix()?;
        let rows = dataset
            .records
            .iter()
            .zip(values)
            .map(|(r, values)| ChurnRow {
                user_id: r.user_id.clone(),
                values,
                churned: r.churned,
                final_tier: r.final_tier,
            })
            .collect();

        Ok(ChurnPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            computed_at_utc: Utc::now().to_rfc3339(),
            columns: dataset.column_names(),
            churn_rate: dataset.churn_rate(),
            rows,
            training: training.cloned(),
        })
    }

    pub fn encode_churn_to_json(
        &self,
        dataset: &ChurnDataset,
        training: Option<&ChurnReport>,
    ) -> Result<String, SignalError> {
        let payload = self.encode_churn(dataset, training)?;
        serde_json::to_string_pretty(&payload).map_err(SignalError::JsonError)
    }

    fn build_quality(&self, run: &CohortRun) -> Quality {
        let report = &run.report;
        let coverage = if report.total_rows == 0 {
            0.0
        } else {
            report.kept_rows as f64 / report.total_rows as f64
        };

        let mut flags = Vec::new();
        if report.dropped_rows() > 0 {
            flags.push("dropped_rows".to_string());
        }
        if run.scored.len() < 2 {
            flags.push("single_user_cohort".to_string());
        }
        let churn_rate = run.churn_dataset.churn_rate();
        if churn_rate == 0.0 || churn_rate == 1.0 {
            flags.push("single_class_churn_labels".to_string());
        }

        Quality {
            total_rows: report.total_rows,
            kept_rows: report.kept_rows,
            dropped_missing_user: report.dropped_missing_user,
            dropped_bad_timestamp: report.dropped_bad_timestamp,
            dropped_missing_event: report.dropped_missing_event,
            coverage,
            flags,
        }
    }
}
