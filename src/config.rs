//! Pipeline configuration
//!
//! Every tunable constant of the pipeline lives here. The defaults reproduce the
//! reference scoring model; a JSON file with any subset of sections can override them.

use crate::error::SignalError;
use crate::schema::UserIdColumn;
use serde::{Deserialize, Serialize};

/// Default week-1 window length in days (inclusive)
pub const DEFAULT_WINDOW_DAYS: f64 = 7.0;

/// Default additive epsilon used inside the entropy logarithm
pub const DEFAULT_ENTROPY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifier resolution
    pub normalizer: NormalizerConfig,
    /// Feature extraction parameters
    pub features: FeatureConfig,
    /// Composite score weights
    pub scoring: ScoreWeights,
    /// Tier percentile cut-points
    pub tiers: TierCutoffs,
    /// Churn model training
    pub churn: ChurnConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Columns consulted in order to resolve the canonical user id
    pub user_id_columns: Vec<UserIdColumn>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            user_id_columns: vec![UserIdColumn::PersonId],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Early window length in days since the user's first event (inclusive)
    pub window_days: f64,
    /// Case-insensitive substrings marking an execution event
    pub execution_keywords: Vec<String>,
    /// A session is "diverse" when its distinct event names exceed this count
    pub diverse_session_min_event_types: usize,
    /// Additive epsilon inside log2 for the diversity entropy
    pub entropy_epsilon: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            execution_keywords: ["run", "execute", "block_", "agent_"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            diverse_session_min_event_types: 3,
            entropy_epsilon: DEFAULT_ENTROPY_EPSILON,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub days_active: f64,
    pub weeks_active: f64,
    pub time_span: f64,
    pub unique_event_types: f64,
    pub event_diversity: f64,
    pub diverse_sessions: f64,
    pub credits_log: f64,
    pub tool_invocation_divisor: f64,
    pub execution_divisor: f64,
    /// Scale applied to the cohort-max-normalized terms
    pub normalized_scale: f64,
    pub sustained: f64,
    pub workflow: f64,
    pub serious: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            days_active: 0.4,
            weeks_active: 0.3,
            time_span: 0.3,
            unique_event_types: 0.5,
            event_diversity: 2.0,
            diverse_sessions: 0.5,
            credits_log: 2.0,
            tool_invocation_divisor: 10.0,
            execution_divisor: 10.0,
            normalized_scale: 10.0,
            sustained: 0.35,
            workflow: 0.35,
            serious: 0.30,
        }
    }
}

/// Percentile (0-1) at which each tier starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCutoffs {
    pub power: f64,
    pub active: f64,
    pub regular: f64,
    pub casual: f64,
}

impl Default for TierCutoffs {
    fn default() -> Self {
        Self {
            power: 0.95,
            active: 0.80,
            regular: 0.50,
            casual: 0.20,
        }
    }
}

/// Built-in churn classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    GradientBoostedStumps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    /// Fraction of each class held out for evaluation
    pub test_fraction: f64,
    /// Seed for the stratified shuffle
    pub seed: u64,
    /// Models trained and compared by ROC-AUC
    pub models: Vec<ModelKind>,
    pub logistic: LogisticConfig,
    pub boosting: BoostingConfig,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            models: vec![ModelKind::LogisticRegression, ModelKind::GradientBoostedStumps],
            logistic: LogisticConfig::default(),
            boosting: BoostingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Upper bound on candidate thresholds per feature
    pub max_thresholds: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_thresholds: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from JSON; missing sections fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, SignalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.normalizer.user_id_columns.is_empty() {
            return Err(SignalError::InvalidConfig(
                "normalizer.user_id_columns must name at least one column".to_string(),
            ));
        }
        if !(self.features.window_days > 0.0 && self.features.window_days.is_finite()) {
            return Err(SignalError::InvalidConfig(format!(
                "features.window_days must be positive, got {}",
                self.features.window_days
            )));
        }
        if self.features.entropy_epsilon < 0.0 {
            return Err(SignalError::InvalidConfig(
                "features.entropy_epsilon must be non-negative".to_string(),
            ));
        }

        let t = &self.tiers;
        let ordered = 0.0 <= t.casual && t.casual <= t.regular && t.regular <= t.active
            && t.active <= t.power && t.power <= 1.0;
        if !ordered {
            return Err(SignalError::InvalidConfig(format!(
                "tier cut-points must satisfy 0 <= casual <= regular <= active <= power <= 1, got {:?}",
                t
            )));
        }

        if self.scoring.tool_invocation_divisor == 0.0 || self.scoring.execution_divisor == 0.0 {
            return Err(SignalError::InvalidConfig(
                "scoring divisors must be non-zero".to_string(),
            ));
        }

        let c = &self.churn;
        if !(c.test_fraction > 0.0 && c.test_fraction < 1.0) {
            return Err(SignalError::InvalidConfig(format!(
                "churn.test_fraction must be in (0, 1), got {}",
                c.test_fraction
            )));
        }
        if c.models.is_empty() {
            return Err(SignalError::InvalidConfig(
                "churn.models must list at least one model".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json(r#"{"features": {"window_days": 14}}"#).unwrap();
        assert_eq!(config.features.window_days, 14.0);
        assert_eq!(config.features.execution_keywords.len(), 4);
        assert_eq!(config.tiers.power, 0.95);
        assert_eq!(config.churn.seed, 42);
    }

    #[test]
    fn test_json_roundtrip_preserves_models() {
        let json = PipelineConfig::default().to_json().unwrap();
        let parsed = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(
            parsed.churn.models,
            vec![ModelKind::LogisticRegression, ModelKind::GradientBoostedStumps]
        );
    }

    #[test]
    fn test_unordered_cutoffs_rejected() {
        let result = PipelineConfig::from_json(r#"{"tiers": {"casual": 0.6, "regular": 0.5}}"#);
        assert!(matches!(result, Err(SignalError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_test_fraction_rejected() {
        let result = PipelineConfig::from_json(r#"{"churn": {"test_fraction": 1.0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_user_columns_rejected() {
        let result = PipelineConfig::from_json(r#"{"normalizer": {"user_id_columns": []}}"#);
        assert!(result.is_err());
    }
}
