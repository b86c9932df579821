//! Feature standardization

use crate::error::SignalError;
use serde::{Deserialize, Serialize};

/// Per-column z-score scaler (population standard deviation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    /// Divisors; 1 for zero-variance columns
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit column statistics on the training rows
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, SignalError> {
        let Some(first) = rows.first() else {
            return Err(SignalError::MatrixError("cannot fit scaler on zero rows".to_string()));
        };
        let width = first.len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(SignalError::MatrixError("ragged feature matrix".to_string()));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut variances = vec![0.0; width];
        for row in rows {
            for ((var, v), m) in variances.iter_mut().zip(row).zip(&means) {
                *var += (v - m).powi(2);
            }
        }
        let scales = variances
            .into_iter()
            .map(|var| {
                let std = (var / n).sqrt();
                if std > 0.0 && std.is_finite() {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { means, scales })
    }

    /// Standardize rows with the fitted statistics
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SignalError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.means.len() {
                    return Err(SignalError::MatrixError(format!(
                        "expected {} columns, got {}",
                        self.means.len(),
                        row.len()
                    )));
                }
                Ok(row
                    .iter()
                    .zip(&self.means)
                    .zip(&self.scales)
                    .map(|((v, m), s)| (v - m) / s)
                    .collect())
            })
            .collect()
    }

    pub fn fit_transform(rows: &[Vec<f64>]) -> Result<(Self, Vec<Vec<f64>>), SignalError> {
        let scaler = Self::fit(rows)?;
        let scaled = scaler.transform(rows)?;
        Ok((scaler, scaled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizes_columns() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let (scaler, scaled) = StandardScaler::fit_transform(&rows).unwrap();

        assert_eq!(scaler.means, vec![2.0, 5.0]);
        assert_eq!(scaler.scales, vec![1.0, 1.0]);
        assert_eq!(scaled, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_zero_mean_unit_variance() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 * 3.0 + 1.0]).collect();
        let (_, scaled) = StandardScaler::fit_transform(&rows).unwrap();
        let mean: f64 = scaled.iter().map(|r| r[0]).sum::<f64>() / 10.0;
        let var: f64 = scaled.iter().map(|r| (r[0] - mean).powi(2)).sum::<f64>() / 10.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = StandardScaler::fit(&[vec![1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&[vec![1.0]]).is_err());
        assert!(StandardScaler::fit(&[]).is_err());
        assert!(StandardScaler::fit(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
