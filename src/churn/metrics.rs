//! Classifier evaluation

use serde::{Deserialize, Serialize};

/// Fraction of predictions equal to the labels (0 for empty input)
pub fn accuracy(labels: &[u8], predictions: &[u8]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let hits = labels
        .iter()
        .zip(predictions)
        .filter(|(a, b)| a == b)
        .count();
    hits as f64 / labels.len() as f64
}

/// ROC-AUC via the Mann-Whitney statistic; tied scores count one half
///
/// `None` when the labels hold a single class.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let positives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|&(&l, _)| l == 1)
        .map(|(_, &s)| s)
        .collect();
    let negatives: Vec<f64> = labels
        .iter()
        .zip(scores)
        .filter(|&(&l, _)| l != 1)
        .map(|(_, &s)| s)
        .collect();
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }

    let mut wins = 0.0;
    for p in &positives {
        for n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    Some(wins / (positives.len() * negatives.len()) as f64)
}

/// Binary confusion matrix, churned = positive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(labels: &[u8], predictions: &[u8]) -> Self {
        let mut counts = Self::default();
        for (&l, &p) in labels.iter().zip(predictions) {
            match (l == 1, p == 1) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }

    /// Of predicted churners, the fraction that churned
    pub fn precision(&self) -> Option<f64> {
        let predicted = self.true_positive + self.false_positive;
        (predicted > 0).then(|| self.true_positive as f64 / predicted as f64)
    }

    /// Of actual churners, the fraction caught
    pub fn recall(&self) -> Option<f64> {
        let actual = self.true_positive + self.false_negative;
        (actual > 0).then(|| self.true_positive as f64 / actual as f64)
    }
}
