//! Stratified train/test split

use crate::error::SignalError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::warn;

/// Row indices of each side of a split, each sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Hold out `test_fraction` of each class, shuffled with a seeded RNG
///
/// Fails when only one class is present or when a class would be missing from
/// the training side.
pub fn stratified_split(
    labels: &[u8],
    test_fraction: f64,
    seed: u64,
) -> Result<SplitIndices, SignalError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SignalError::InvalidConfig(format!(
            "test fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }

    let mut negatives: Vec<usize> = Vec::new();
    let mut positives: Vec<usize> = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        if label == 1 {
            positives.push(i);
        } else {
            negatives.push(i);
        }
    }
    if negatives.is_empty() || positives.is_empty() {
        return Err(SignalError::DegenerateLabels(format!(
            "{} churned and {} retained users; both classes are required",
            positives.len(),
            negatives.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for (label, mut class) in [(0u8, negatives), (1u8, positives)] {
        class.shuffle(&mut rng);
        let n_test = ((class.len() as f64) * test_fraction).round() as usize;
        if n_test == 0 {
            warn!(
                label,
                class_size = class.len(),
                test_fraction,
                "class has no held-out rows; test ROC-AUC will be undefined"
            );
        }
        if n_test >= class.len() {
            return Err(SignalError::DegenerateLabels(format!(
                "class of {} users leaves nothing to train on",
                class.len()
            )));
        }
        test.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(SplitIndices { train, test })
}

/// Pick rows by index
pub fn take_rows<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| values.get(i).cloned()).collect()
}
