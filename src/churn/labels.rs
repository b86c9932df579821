//! Churn label building
//!
//! Week-1 features are inner-joined with final tiers on user id. Only week-1
//! values ever reach the feature matrix; the final tier and composite score are
//! carried for reporting.

use crate::error::SignalError;
use crate::types::{ScoredUser, Tier, UserFeatureVector, Window};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One labelled user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnRecord {
    pub user_id: String,
    /// Week-1 features
    pub features: UserFeatureVector,
    pub final_tier: Tier,
    pub composite_success_score: f64,
    /// 1 iff the final tier is Trial or Casual
    pub churned: u8,
}

/// Labelled week-1 dataset, ordered by user id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChurnDataset {
    pub records: Vec<ChurnRecord>,
}

impl ChurnDataset {
    /// Inner join of week-1 vectors with scored users
    ///
    /// Users missing from either side are dropped.
    pub fn build(week1: &[UserFeatureVector], scored: &[ScoredUser]) -> Self {
        let by_id: HashMap<&str, &ScoredUser> = scored.iter().map(|u| (u.user_id(), u)).collect();

        let mut records: Vec<ChurnRecord> = week1
            .iter()
            .filter_map(|features| {
                let user = by_id.get(features.user_id.as_str())?;
                Some(ChurnRecord {
                    user_id: features.user_id.clone(),
                    features: features.clone(),
                    final_tier: user.tier,
                    composite_success_score: user.scores.composite_success_score,
                    churned: u8::from(user.tier.is_churned()),
                })
            })
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        debug!(
            week1_users = week1.len(),
            scored_users = scored.len(),
            joined = records.len(),
            "built churn dataset"
        );
        Self { records }
    }

    /// Labels derived from each user's own full-history tier
    pub fn from_scored(scored: &[ScoredUser]) -> Self {
        let mut records: Vec<ChurnRecord> = scored
            .iter()
            .map(|u| ChurnRecord {
                user_id: u.user_id().to_string(),
                features: u.features.clone(),
                final_tier: u.tier,
                composite_success_score: u.scores.composite_success_score,
                churned: u8::from(u.tier.is_churned()),
            })
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Window the features were extracted over (week-1 when empty)
    pub fn window(&self) -> Window {
        self.records
            .first()
            .map(|r| r.features.window)
            .unwrap_or_else(Window::week_one)
    }

    /// Prefixed column names in matrix order
    pub fn column_names(&self) -> Vec<String> {
        UserFeatureVector::column_names(self.window())
    }

    /// Row-major feature matrix with every value finite
    pub fn feature_matrix(&self) -> Result<Vec<Vec<f64>>, SignalError> {
        self.records
            .iter()
            .map(|r| {
                let row = r.features.values();
                if let Some(pos) = row.iter().position(|v| !v.is_finite()) {
                    return Err(SignalError::MatrixError(format!(
                        "non-finite value in column {} for user {}",
                        pos, r.user_id
                    )));
                }
                Ok(row)
            })
            .collect()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.records.iter().map(|r| r.churned).collect()
    }

    /// Fraction of churned users (0 for an empty dataset)
    pub fn churn_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().filter(|r| r.churned == 1).count() as f64 / self.records.len() as f64
    }
}
