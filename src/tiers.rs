//! Tier classification
//!
//! Percentile cut-points are computed once over the cohort's composite scores
//! and every user is bucketed against them. Boundary values belong to the
//! higher tier.

use crate::config::TierCutoffs;
use crate::error::SignalError;
use crate::types::{ScoredUser, Tier};
use serde::{Deserialize, Serialize};

/// Absolute composite-score cut-points for one cohort
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub casual: f64,
    pub regular: f64,
    pub active: f64,
    pub power: f64,
}

impl TierThresholds {
    /// Compute cut-points from a cohort's composite scores
    pub fn from_scores(scores: &[f64], cutoffs: &TierCutoffs) -> Result<Self, SignalError> {
        if scores.is_empty() {
            return Err(SignalError::EmptyCohort(
                "cannot compute tier thresholds without scores".to_string(),
            ));
        }
        let mut sorted: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
        if sorted.is_empty() {
            return Err(SignalError::EmptyCohort(
                "no finite composite scores".to_string(),
            ));
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        Ok(Self {
            casual: quantile_sorted(&sorted, cutoffs.casual),
            regular: quantile_sorted(&sorted, cutoffs.regular),
            active: quantile_sorted(&sorted, cutoffs.active),
            power: quantile_sorted(&sorted, cutoffs.power),
        })
    }

    /// Bucket a composite score
    pub fn classify(&self, score: f64) -> Tier {
        if score >= self.power {
            Tier::Power
        } else if score >= self.active {
            Tier::Active
        } else if score >= self.regular {
            Tier::Regular
        } else if score >= self.casual {
            Tier::Casual
        } else {
            Tier::Trial
        }
    }
}

/// Linear-interpolated quantile of ascending values (`q` in 0-1)
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Aggregate statistics for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub user_count: usize,
    /// Share of the cohort (0-1)
    pub share: f64,
    pub composite_mean: f64,
    pub composite_min: f64,
    pub composite_max: f64,
    pub days_active_mean: f64,
    pub total_events_mean: f64,
    pub unique_event_types_mean: f64,
    pub total_credits_used_mean: f64,
    pub execution_event_count_mean: f64,
    pub weeks_active_mean: f64,
}

/// Per-tier statistics, highest tier first; empty tiers are reported with zeros
pub fn summarize_tiers(users: &[ScoredUser]) -> Vec<TierSummary> {
    Tier::ALL
        .iter()
        .map(|&tier| {
            let members: Vec<&ScoredUser> = users.iter().filter(|u| u.tier == tier).collect();
            let n = members.len();
            let mean = |f: &dyn Fn(&ScoredUser) -> f64| -> f64 {
                if n == 0 {
                    0.0
                } else {
                    members.iter().map(|u| f(u)).sum::<f64>() / n as f64
                }
            };
            let composites = members.iter().map(|u| u.scores.composite_success_score);

            TierSummary {
                tier,
                user_count: n,
                share: if users.is_empty() {
                    0.0
                } else {
                    n as f64 / users.len() as f64
                },
                composite_mean: mean(&|u| u.scores.composite_success_score),
                composite_min: if n == 0 { 0.0 } else { composites.clone().fold(f64::INFINITY, f64::min) },
                composite_max: if n == 0 { 0.0 } else { composites.fold(f64::NEG_INFINITY, f64::max) },
                days_active_mean: mean(&|u| u.features.days_active as f64),
                total_events_mean: mean(&|u| u.features.total_events as f64),
                unique_event_types_mean: mean(&|u| u.features.unique_event_types as f64),
                total_credits_used_mean: mean(&|u| u.features.total_credits_used),
                execution_event_count_mean: mean(&|u| u.features.execution_event_count as f64),
                weeks_active_mean: mean(&|u| u.features.weeks_active as f64),
            }
        })
        .collect()
}
