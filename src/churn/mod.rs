//! Early churn prediction
//!
//! Builds a leakage-free week-1 dataset labelled from final tiers, then trains
//! classifiers on standardized features against that label.
//!
//! Pipeline: week-1 vectors + scored users → ChurnDataset → stratified split →
//! StandardScaler → ChurnClassifier → evaluation

pub mod labels;
pub mod metrics;
pub mod model;
pub mod scaler;
pub mod split;
pub mod trainer;

pub use labels::{ChurnDataset, ChurnRecord};
pub use metrics::{accuracy, roc_auc, ConfusionCounts};
pub use model::{
    named_importances, ChurnClassifier, FeatureImportance, GradientBoostedStumps, LogisticRegression,
};
pub use scaler::StandardScaler;
pub use split::{stratified_split, SplitIndices};
pub use trainer::{
    compare_full_vs_week1, train_and_compare, train_model, ModelComparison, ModelEvaluation,
    TrainedModel, WindowComparison,
};
