//! Churn model training and comparison

use super::labels::ChurnDataset;
use super::metrics::{accuracy, roc_auc, ConfusionCounts};
use super::model::{
    named_importances, ChurnClassifier, FeatureImportance, GradientBoostedStumps,
    LogisticRegression,
};
use super::scaler::StandardScaler;
use super::split::{stratified_split, take_rows};
use crate::config::{ChurnConfig, ModelKind};
use crate::error::SignalError;
use crate::types::ScoredUser;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Held-out evaluation of one fitted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub kind: ModelKind,
    pub model: String,
    pub train_size: usize,
    pub test_size: usize,
    pub n_features: usize,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    /// `None` when the test split holds a single class
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionCounts,
    pub feature_importances: Vec<FeatureImportance>,
}

/// A fitted model together with the scaler fitted on its training rows
pub struct TrainedModel {
    pub evaluation: ModelEvaluation,
    pub scaler: StandardScaler,
    pub classifier: Box<dyn ChurnClassifier>,
    /// User ids of the held-out rows, ascending
    pub test_user_ids: Vec<String>,
    /// P(churned) for each held-out row
    pub test_probabilities: Vec<f64>,
}

impl TrainedModel {
    /// P(churned) for unscaled feature rows
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, SignalError> {
        let scaled = self.scaler.transform(rows)?;
        self.classifier.predict_proba(&scaled)
    }

    /// 0/1 churn predictions for unscaled feature rows
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<u8>, SignalError> {
        let scaled = self.scaler.transform(rows)?;
        self.classifier.predict(&scaled)
    }
}

/// Every configured model evaluated on the same split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub dataset_size: usize,
    pub churn_rate: f64,
    pub evaluations: Vec<ModelEvaluation>,
    /// Name of the model with the highest ROC-AUC
    pub best_model: String,
}

/// Same model trained on week-1 and on full-history features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowComparison {
    pub week1: ModelEvaluation,
    pub full: ModelEvaluation,
    /// week-1 AUC minus full-history AUC
    pub auc_difference: Option<f64>,
}

fn build_classifier(kind: ModelKind, config: &ChurnConfig) -> Box<dyn ChurnClassifier> {
    match kind {
        ModelKind::LogisticRegression => Box::new(LogisticRegression::new(config.logistic.clone())),
        ModelKind::GradientBoostedStumps => {
            Box::new(GradientBoostedStumps::new(config.boosting.clone()))
        }
    }
}

/// Split, standardize, fit and evaluate one model kind
pub fn train_model(
    dataset: &ChurnDataset,
    kind: ModelKind,
    config: &ChurnConfig,
) -> Result<TrainedModel, SignalError> {
    if dataset.is_empty() {
        return Err(SignalError::EmptyCohort("churn dataset has no users".to_string()));
    }

    let x = dataset.feature_matrix()?;
    let y = dataset.labels();
    let split = stratified_split(&y, config.test_fraction, config.seed)?;

    let y_train = take_rows(&y, &split.train);
    let y_test = take_rows(&y, &split.test);
    let (scaler, x_train) = StandardScaler::fit_transform(&take_rows(&x, &split.train))?;
    let x_test = scaler.transform(&take_rows(&x, &split.test))?;

    let mut classifier = build_classifier(kind, config);
    classifier.fit(&x_train, &y_train)?;

    let train_pred = classifier.predict(&x_train)?;
    let test_proba = classifier.predict_proba(&x_test)?;
    let test_pred: Vec<u8> = test_proba.iter().map(|&p| u8::from(p >= 0.5)).collect();

    let evaluation = ModelEvaluation {
        kind,
        model: classifier.name().to_string(),
        train_size: split.train.len(),
        test_size: split.test.len(),
        n_features: x_train.first().map_or(0, Vec::len),
        train_accuracy: accuracy(&y_train, &train_pred),
        test_accuracy: accuracy(&y_test, &test_pred),
        roc_auc: roc_auc(&y_test, &test_proba),
        confusion: ConfusionCounts::from_predictions(&y_test, &test_pred),
        feature_importances: named_importances(
            &dataset.column_names(),
            &classifier.feature_importances(),
        ),
    };

    info!(
        model = %evaluation.model,
        train = evaluation.train_size,
        test = evaluation.test_size,
        train_accuracy = evaluation.train_accuracy,
        test_accuracy = evaluation.test_accuracy,
        roc_auc = ?evaluation.roc_auc,
        "trained churn model"
    );

    let test_user_ids = split
        .test
        .iter()
        .map(|&i| dataset.records[i].user_id.clone())
        .collect();

    Ok(TrainedModel {
        evaluation,
        scaler,
        classifier,
        test_user_ids,
        test_probabilities: test_proba,
    })
}

/// Train every configured model and keep the one with the best ROC-AUC
///
/// Ties keep the earlier model in configuration order.
pub fn train_and_compare(
    dataset: &ChurnDataset,
    config: &ChurnConfig,
) -> Result<(ModelComparison, TrainedModel), SignalError> {
    let mut best: Option<TrainedModel> = None;
    let mut evaluations = Vec::with_capacity(config.models.len());

    for &kind in &config.models {
        let trained = train_model(dataset, kind, config)?;
        evaluations.push(trained.evaluation.clone());

        let better = match &best {
            None => true,
            Some(current) => auc_key(&trained.evaluation) > auc_key(&current.evaluation),
        };
        if better {
            best = Some(trained);
        }
    }

    let best = best.ok_or_else(|| {
        SignalError::InvalidConfig("no churn models configured".to_string())
    })?;
    info!(model = %best.evaluation.model, roc_auc = ?best.evaluation.roc_auc, "selected churn model");

    let comparison = ModelComparison {
        dataset_size: dataset.len(),
        churn_rate: dataset.churn_rate(),
        evaluations,
        best_model: best.evaluation.model.clone(),
    };
    Ok((comparison, best))
}

fn auc_key(evaluation: &ModelEvaluation) -> f64 {
    evaluation.roc_auc.unwrap_or(f64::NEG_INFINITY)
}

/// Train one model kind on week-1 features and on full-history features
///
/// The full-history model labels every scored user from their own tier, so it
/// shows what waiting for the complete history would buy.
pub fn compare_full_vs_week1(
    week1: &ChurnDataset,
    scored: &[ScoredUser],
    kind: ModelKind,
    config: &ChurnConfig,
) -> Result<WindowComparison, SignalError> {
    let week1_eval = train_model(week1, kind, config)?.evaluation;
    let full_eval = train_model(&ChurnDataset::from_scored(scored), kind, config)?.evaluation;

    let auc_difference = match (week1_eval.roc_auc, full_eval.roc_auc) {
        (Some(w), Some(f)) => Some(w - f),
        _ => None,
    };
    info!(
        week1_auc = ?week1_eval.roc_auc,
        full_auc = ?full_eval.roc_auc,
        "compared week-1 and full-history models"
    );

    Ok(WindowComparison {
        week1: week1_eval,
        full: full_eval,
        auc_difference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositeScore, Tier, UserFeatureVector, Window};

    fn vector(user: &str, window: Window, days: u32, events: u32) -> UserFeatureVector {
        UserFeatureVector {
            user_id: user.to_string(),
            window,
            days_active: days,
            time_span_days: days as f64,
            weeks_active: 1,
            avg_events_per_day: events as f64 / days.max(1) as f64,
            unique_event_types: events.min(5),
            event_diversity_score: 1.0,
            total_events: events,
            execution_event_count: events / 2,
            execution_event_rate: 0.5,
            max_canvas_revisits: 0,
            unique_canvases: 1,
            unique_sessions: 1,
            avg_events_per_session: events as f64,
            max_events_per_session: events,
            sessions_with_diverse_events: 0,
            total_credits_used: 0.0,
            total_credit_amount: 0.0,
            tool_invocation_count: 0,
            unique_tools_used: 0,
            message_count: 0,
        }
    }

    /// 60 users; low early activity ends in Trial/Casual
    fn cohort() -> (Vec<UserFeatureVector>, Vec<ScoredUser>) {
        let mut week1 = Vec::new();
        let mut scored = Vec::new();
        for i in 0..60u32 {
            let id = format!("u{:02}", i);
            let engaged = i % 3 != 0;
            let (days, events) = if engaged { (4 + i % 3, 40 + i) } else { (1, 2 + i % 4) };
            let tier = if engaged { Tier::Regular } else { Tier::Trial };
            week1.push(vector(&id, Window::week_one(), days, events));
            scored.push(ScoredUser {
                features: vector(&id, Window::Full, days * 2, events * 3),
                scores: CompositeScore {
                    sustained_usage_score: 0.0,
                    workflow_depth_score: 0.0,
                    serious_usage_score: 0.0,
                    composite_success_score: f64::from(events),
                },
                tier,
            });
        }
        (week1, scored)
    }

    #[test]
    fn test_train_model_separates_cohort() {
        let (week1, scored) = cohort();
        let dataset = ChurnDataset::build(&week1, &scored);
        let trained = train_model(&dataset, ModelKind::LogisticRegression, &ChurnConfig::default()).unwrap();

        let eval = &trained.evaluation;
        assert_eq!(eval.train_size + eval.test_size, 60);
        assert_eq!(eval.test_size, 12);
        assert_eq!(eval.n_features, 20);
        assert_eq!(eval.roc_auc, Some(1.0));
        assert_eq!(eval.test_accuracy, 1.0);
        assert_eq!(trained.test_user_ids.len(), 12);
        assert!(eval.feature_importances[0].feature.starts_with("w1_"));
    }

    #[test]
    fn test_compare_picks_a_configured_model() {
        let (week1, scored) = cohort();
        let dataset = ChurnDataset::build(&week1, &scored);
        let (comparison, best) = train_and_compare(&dataset, &ChurnConfig::default()).unwrap();

        assert_eq!(comparison.evaluations.len(), 2);
        assert_eq!(comparison.best_model, best.evaluation.model);
        assert_eq!(comparison.dataset_size, 60);
        assert!((comparison.churn_rate - 1.0 / 3.0).abs() < 1e-12);

        let rows: Vec<Vec<f64>> = dataset.records.iter().map(|r| r.features.values()).collect();
        let preds = best.predict(&rows).unwrap();
        assert_eq!(preds, dataset.labels());
    }

    #[test]
    fn test_degenerate_labels_are_fatal() {
        let (week1, mut scored) = cohort();
        for user in &mut scored {
            user.tier = Tier::Power;
        }
        let dataset = ChurnDataset::build(&week1, &scored);
        let result = train_and_compare(&dataset, &ChurnConfig::default());
        assert!(matches!(result, Err(SignalError::DegenerateLabels(_))));
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        let result = train_model(&ChurnDataset::default(), ModelKind::LogisticRegression, &ChurnConfig::default());
        assert!(matches!(result, Err(SignalError::EmptyCohort(_))));
    }

    #[test]
    fn test_full_vs_week1() {
        let (week1, scored) = cohort();
        let dataset = ChurnDataset::build(&week1, &scored);
        let comparison =
            compare_full_vs_week1(&dataset, &scored, ModelKind::GradientBoostedStumps, &ChurnConfig::default())
                .unwrap();

        assert!(comparison.week1.feature_importances[0].feature.starts_with("w1_"));
        assert!(!comparison.full.feature_importances[0].feature.starts_with("w1_"));
        assert!(comparison.auc_difference.is_some());
    }
}
