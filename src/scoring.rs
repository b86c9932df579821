//! Composite success scoring
//!
//! Combines feature vectors into three sub-scores and one weighted composite.
//! Two terms are normalized by the cohort maximum, so scores are comparable only
//! within a single scoring run.

use crate::config::ScoreWeights;
use crate::types::{CompositeScore, UserFeatureVector};

/// Cohort-wide maxima used by the normalized terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortMaxima {
    pub time_span_days: f64,
    pub sessions_with_diverse_events: f64,
}

impl CohortMaxima {
    /// Maxima over a cohort (0 for an empty cohort)
    pub fn from_vectors(vectors: &[UserFeatureVector]) -> Self {
        Self {
            time_span_days: vectors
                .iter()
                .map(|v| v.time_span_days)
                .fold(0.0, f64::max),
            sessions_with_diverse_events: vectors
                .iter()
                .map(|v| v.sessions_with_diverse_events as f64)
                .fold(0.0, f64::max),
        }
    }
}

/// Composite scorer
pub struct CompositeScorer {
    weights: ScoreWeights,
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl CompositeScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Score every vector against the maxima of the same cohort
    pub fn score_cohort(&self, vectors: &[UserFeatureVector]) -> Vec<CompositeScore> {
        let maxima = CohortMaxima::from_vectors(vectors);
        vectors.iter().map(|v| self.score(v, &maxima)).collect()
    }

    /// Score one vector given precomputed cohort maxima
    pub fn score(&self, v: &UserFeatureVector, maxima: &CohortMaxima) -> CompositeScore {
        let w = &self.weights;

        let sustained_usage_score = w.days_active * v.days_active as f64
            + w.weeks_active * v.weeks_active as f64
            + w.time_span * normalized(v.time_span_days, maxima.time_span_days, w.normalized_scale);

        let workflow_depth_score = w.unique_event_types * v.unique_event_types as f64
            + w.event_diversity * v.event_diversity_score
            + w.diverse_sessions
                * normalized(
                    v.sessions_with_diverse_events as f64,
                    maxima.sessions_with_diverse_events,
                    w.normalized_scale,
                );

        let serious_usage_score = w.credits_log * v.total_credits_used.max(0.0).ln_1p()
            + v.tool_invocation_count as f64 / w.tool_invocation_divisor
            + v.execution_event_count as f64 / w.execution_divisor;

        let composite_success_score = w.sustained * sustained_usage_score
            + w.workflow * workflow_depth_score
            + w.serious * serious_usage_score;

        CompositeScore {
            sustained_usage_score: finite_or_zero(sustained_usage_score),
            workflow_depth_score: finite_or_zero(workflow_depth_score),
            serious_usage_score: finite_or_zero(serious_usage_score),
            composite_success_score: finite_or_zero(composite_success_score),
        }
    }
}

/// `scale · value / max`, or 0 when the cohort maximum is 0
fn normalized(value: f64, max: f64, scale: f64) -> f64 {
    if max > 0.0 {
        value / max * scale
    } else {
        0.0
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Window;

    fn vector(user: &str) -> UserFeatureVector {
        UserFeatureVector {
            user_id: user.to_string(),
            window: Window::Full,
            days_active: 0,
            time_span_days: 0.0,
            weeks_active: 0,
            avg_events_per_day: 0.0,
            unique_event_types: 0,
            event_diversity_score: 0.0,
            total_events: 0,
            execution_event_count: 0,
            execution_event_rate: 0.0,
            max_canvas_revisits: 0,
            unique_canvases: 0,
            unique_sessions: 0,
            avg_events_per_session: 0.0,
            max_events_per_session: 0,
            sessions_with_diverse_events: 0,
            total_credits_used: 0.0,
            total_credit_amount: 0.0,
            tool_invocation_count: 0,
            unique_tools_used: 0,
            message_count: 0,
        }
    }

    #[test]
    fn test_reference_formula() {
        let mut a = vector("a");
        a.days_active = 5;
        a.weeks_active = 2;
        a.time_span_days = 10.0;
        a.unique_event_types = 8;
        a.event_diversity_score = 2.5;
        a.sessions_with_diverse_events = 2;
        a.total_credits_used = std::f64::consts::E - 1.0;
        a.tool_invocation_count = 20;
        a.execution_event_count = 30;

        let mut b = vector("b");
        b.time_span_days = 20.0;
        b.sessions_with_diverse_events = 4;

        let scores = CompositeScorer::default().score_cohort(&[a, b]);
        let s = scores[0];

        // 0.4*5 + 0.3*2 + 0.3*(10*10/20)
        assert!((s.sustained_usage_score - 4.1).abs() < 1e-9);
        // 0.5*8 + 2*2.5 + 0.5*(10*2/4)
        assert!((s.workflow_depth_score - 11.5).abs() < 1e-9);
        // 2*ln(e) + 20/10 + 30/10
        assert!((s.serious_usage_score - 7.0).abs() < 1e-9);
        let composite = 0.35 * 4.1 + 0.35 * 11.5 + 0.30 * 7.0;
        assert!((s.composite_success_score - composite).abs() < 1e-9);
    }

    #[test]
    fn test_zero_cohort_maxima_do_not_produce_nan() {
        let mut a = vector("a");
        a.days_active = 1;
        a.weeks_active = 1;
        let scores = CompositeScorer::default().score_cohort(&[a.clone(), a]);

        for s in scores {
            assert!(s.composite_success_score.is_finite());
            assert!((s.sustained_usage_score - 0.7).abs() < 1e-12);
            assert_eq!(s.workflow_depth_score, 0.0);
        }
    }

    #[test]
    fn test_scores_are_cohort_relative() {
        let mut a = vector("a");
        a.time_span_days = 5.0;
        let mut big = vector("big");
        big.time_span_days = 50.0;

        let scorer = CompositeScorer::default();
        let alone = scorer.score_cohort(&[a.clone()])[0];
        let with_big = scorer.score_cohort(&[a, big])[0];
        assert!(alone.sustained_usage_score > with_big.sustained_usage_score);
    }

    #[test]
    fn test_cohort_maxima_empty() {
        let maxima = CohortMaxima::from_vectors(&[]);
        assert_eq!(maxima.time_span_days, 0.0);
        assert_eq!(maxima.sessions_with_diverse_events, 0.0);
    }
}
