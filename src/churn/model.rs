//! Churn classifiers
//!
//! Both built-in models are deterministic given the same training rows, so two
//! runs over identical data produce identical probabilities.

use crate::config::{BoostingConfig, LogisticConfig};
use crate::error::SignalError;
use serde::{Deserialize, Serialize};

/// Binary churn classifier over standardized feature rows
pub trait ChurnClassifier {
    /// Short model name used in reports
    fn name(&self) -> &'static str;

    /// Fit on rows `x` against 0/1 labels `y`
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> Result<(), SignalError>;

    /// P(churned) for each row, each in [0, 1]
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, SignalError>;

    /// Hard 0/1 predictions at the 0.5 cut
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<u8>, SignalError> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect())
    }

    /// Non-negative per-column weights summing to 1 (all zero when uninformative)
    fn feature_importances(&self) -> Vec<f64>;
}

/// Named importance, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub weight: f64,
}

/// Pair importances with column names, heaviest first (ties by name)
pub fn named_importances(names: &[String], weights: &[f64]) -> Vec<FeatureImportance> {
    let mut named: Vec<FeatureImportance> = names
        .iter()
        .zip(weights)
        .map(|(feature, &weight)| FeatureImportance {
            feature: feature.clone(),
            weight,
        })
        .collect();
    named.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    named
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn normalize_weights(raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 && total.is_finite() {
        raw.into_iter().map(|w| w / total).collect()
    } else {
        vec![0.0; raw.len()]
    }
}

/// Shape checks shared by both models; returns the row width
fn check_training_rows(x: &[Vec<f64>], y: &[u8]) -> Result<usize, SignalError> {
    if x.is_empty() {
        return Err(SignalError::TrainingError("no training rows".to_string()));
    }
    if x.len() != y.len() {
        return Err(SignalError::TrainingError(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let width = x[0].len();
    if x.iter().any(|r| r.len() != width) {
        return Err(SignalError::MatrixError("ragged feature matrix".to_string()));
    }
    if x.iter().flatten().any(|v| !v.is_finite()) {
        return Err(SignalError::MatrixError("non-finite training value".to_string()));
    }
    let positives = y.iter().filter(|&&l| l == 1).count();
    if positives == 0 || positives == y.len() {
        return Err(SignalError::DegenerateLabels(
            "training labels contain a single class".to_string(),
        ));
    }
    Ok(width)
}

fn check_width(x: &[Vec<f64>], width: usize) -> Result<(), SignalError> {
    match x.iter().find(|r| r.len() != width) {
        Some(r) => Err(SignalError::MatrixError(format!(
            "model expects {} columns, got {}",
            width,
            r.len()
        ))),
        None => Ok(()),
    }
}

/// L2-regularized logistic regression fitted by batch gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    config: LogisticConfig,
    weights: Vec<f64>,
    bias: f64,
    fitted: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(LogisticConfig::default())
    }
}

impl LogisticRegression {
    pub fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            bias: 0.0,
            fitted: false,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn logit(&self, row: &[f64]) -> f64 {
        self.bias
            + row
                .iter()
                .zip(&self.weights)
                .map(|(x, w)| x * w)
                .sum::<f64>()
    }
}

impl ChurnClassifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> Result<(), SignalError> {
        let width = check_training_rows(x, y)?;
        let n = x.len() as f64;
        self.weights = vec![0.0; width];
        self.bias = 0.0;

        let mut grad = vec![0.0; width];
        for _ in 0..self.config.epochs {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0;

            for (row, &label) in x.iter().zip(y) {
                let err = sigmoid(self.logit(row)) - f64::from(label);
                for (g, v) in grad.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_bias += err;
            }

            for (w, g) in self.weights.iter_mut().zip(&grad) {
                *w -= self.config.learning_rate * (g / n + self.config.l2 * *w);
            }
            self.bias -= self.config.learning_rate * grad_bias / n;
        }

        if self.weights.iter().any(|w| !w.is_finite()) || !self.bias.is_finite() {
            return Err(SignalError::TrainingError(
                "logistic regression diverged".to_string(),
            ));
        }
        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, SignalError> {
        if !self.fitted {
            return Err(SignalError::TrainingError("model is not fitted".to_string()));
        }
        check_width(x, self.weights.len())?;
        Ok(x.iter().map(|row| sigmoid(self.logit(row))).collect())
    }

    fn feature_importances(&self) -> Vec<f64> {
        normalize_weights(self.weights.iter().map(|w| w.abs()).collect())
    }
}

/// Depth-1 regression tree on one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Stump {
    feature: usize,
    threshold: f64,
    left: f64,
    right: f64,
}

impl Stump {
    fn value(&self, row: &[f64]) -> f64 {
        if row[self.feature] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

/// Gradient boosting of decision stumps under logistic loss
///
/// Leaves take a Newton step; importances are accumulated split gains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedStumps {
    config: BoostingConfig,
    init: f64,
    stumps: Vec<Stump>,
    gains: Vec<f64>,
    width: usize,
    fitted: bool,
}

impl Default for GradientBoostedStumps {
    fn default() -> Self {
        Self::new(BoostingConfig::default())
    }
}

impl GradientBoostedStumps {
    pub fn new(config: BoostingConfig) -> Self {
        Self {
            config,
            init: 0.0,
            stumps: Vec::new(),
            gains: Vec::new(),
            width: 0,
            fitted: false,
        }
    }

    /// Number of boosting rounds that produced a split
    pub fn n_stumps(&self) -> usize {
        self.stumps.len()
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        self.init
            + self.config.learning_rate * self.stumps.iter().map(|s| s.value(row)).sum::<f64>()
    }

    /// Candidate split positions per feature: (last index on the left, threshold)
    fn candidate_splits(&self, x: &[Vec<f64>], order: &[usize], feature: usize) -> Vec<(usize, f64)> {
        let boundaries: Vec<(usize, f64)> = order
            .windows(2)
            .enumerate()
            .filter_map(|(pos, pair)| {
                let (a, b) = (x[pair[0]][feature], x[pair[1]][feature]);
                (a < b).then(|| (pos, (a + b) / 2.0))
            })
            .collect();

        let limit = self.config.max_thresholds.max(1);
        if boundaries.len() <= limit {
            return boundaries;
        }
        let step = boundaries.len() as f64 / limit as f64;
        (0..limit)
            .map(|k| boundaries[((k as f64 + 0.5) * step) as usize])
            .collect()
    }
}

impl ChurnClassifier for GradientBoostedStumps {
    fn name(&self) -> &'static str {
        "gradient_boosted_stumps"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> Result<(), SignalError> {
        let width = check_training_rows(x, y)?;
        let n = x.len();
        let targets: Vec<f64> = y.iter().map(|&l| f64::from(l)).collect();

        let prior = (targets.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.init = (prior / (1.0 - prior)).ln();
        self.stumps.clear();
        self.gains = vec![0.0; width];
        self.width = width;

        let orders: Vec<Vec<usize>> = (0..width)
            .map(|f| {
                let mut idx: Vec<usize> = (0..n).collect();
                idx.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));
                idx
            })
            .collect();
        let candidates: Vec<Vec<(usize, f64)>> = (0..width)
            .map(|f| self.candidate_splits(x, &orders[f], f))
            .collect();

        let mut scores = vec![self.init; n];
        for _ in 0..self.config.n_estimators {
            let probs: Vec<f64> = scores.iter().map(|&s| sigmoid(s)).collect();
            let residuals: Vec<f64> = targets.iter().zip(&probs).map(|(t, p)| t - p).collect();
            let hessians: Vec<f64> = probs.iter().map(|p| p * (1.0 - p)).collect();
            let total_r: f64 = residuals.iter().sum();
            let total_h: f64 = hessians.iter().sum();
            let base = total_r * total_r / n as f64;

            let mut best: Option<(f64, Stump)> = None;
            for feature in 0..width {
                let order = &orders[feature];
                let mut prefix_r = Vec::with_capacity(n);
                let mut prefix_h = Vec::with_capacity(n);
                let (mut acc_r, mut acc_h) = (0.0, 0.0);
                for &i in order {
                    acc_r += residuals[i];
                    acc_h += hessians[i];
                    prefix_r.push(acc_r);
                    prefix_h.push(acc_h);
                }

                for &(pos, threshold) in &candidates[feature] {
                    let n_left = (pos + 1) as f64;
                    let n_right = (n - pos - 1) as f64;
                    let (r_left, h_left) = (prefix_r[pos], prefix_h[pos]);
                    let (r_right, h_right) = (total_r - r_left, total_h - h_left);

                    let gain = r_left * r_left / n_left + r_right * r_right / n_right - base;
                    if gain > best.map_or(1e-12, |(g, _)| g) {
                        best = Some((
                            gain,
                            Stump {
                                feature,
                                threshold,
                                left: r_left / h_left.max(1e-12),
                                right: r_right / h_right.max(1e-12),
                            },
                        ));
                    }
                }
            }

            let Some((gain, stump)) = best else {
                break;
            };
            for (score, row) in scores.iter_mut().zip(x) {
                *score += self.config.learning_rate * stump.value(row);
            }
            self.gains[stump.feature] += gain;
            self.stumps.push(stump);
        }

        if scores.iter().any(|s| !s.is_finite()) {
            return Err(SignalError::TrainingError(
                "boosting produced non-finite scores".to_string(),
            ));
        }
        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, SignalError> {
        if !self.fitted {
            return Err(SignalError::TrainingError("model is not fitted".to_string()));
        }
        check_width(x, self.width)?;
        Ok(x.iter().map(|row| sigmoid(self.raw_score(row))).collect())
    }

    fn feature_importances(&self) -> Vec<f64> {
        normalize_weights(self.gains.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Column 0 separates the classes, column 1 is noise
    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let noise = ((i * 7) % 5) as f64 - 2.0;
            if i % 2 == 0 {
                x.push(vec![-1.0 - (i % 4) as f64, noise]);
                y.push(0);
            } else {
                x.push(vec![1.0 + (i % 4) as f64, noise]);
                y.push(1);
            }
        }
        (x, y)
    }

    fn assert_learns(model: &mut dyn ChurnClassifier) {
        let (x, y) = separable();
        model.fit(&x, &y).unwrap();

        let preds = model.predict(&x).unwrap();
        assert_eq!(preds, y);

        let probs = model.predict_proba(&x).unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

        let importances = model.feature_importances();
        assert_eq!(importances.len(), 2);
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_regression_learns() {
        assert_learns(&mut LogisticRegression::default());
    }

    #[test]
    fn test_boosted_stumps_learn() {
        assert_learns(&mut GradientBoostedStumps::default());
    }

    #[test]
    fn test_boosting_is_deterministic() {
        let (x, y) = separable();
        let mut a = GradientBoostedStumps::default();
        let mut b = GradientBoostedStumps::default();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_unfitted_model_errors() {
        let model = LogisticRegression::default();
        assert!(model.predict_proba(&[vec![0.0]]).is_err());
        let model = GradientBoostedStumps::default();
        assert!(model.predict(&[vec![0.0]]).is_err());
    }

    #[test]
    fn test_single_class_rejected() {
        let x = vec![vec![1.0], vec![2.0]];
        let result = LogisticRegression::default().fit(&x, &[1, 1]);
        assert!(matches!(result, Err(SignalError::DegenerateLabels(_))));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        assert!(matches!(
            model.predict_proba(&[vec![1.0]]),
            Err(SignalError::MatrixError(_))
        ));
    }

    #[test]
    fn test_named_importances_sorted() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let named = named_importances(&names, &[0.2, 0.5, 0.3]);
        let order: Vec<&str> = named.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }
}
