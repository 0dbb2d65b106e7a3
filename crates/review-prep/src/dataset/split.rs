//! Seeded train/validation split.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use super::Dataset;
use crate::error::{PipelineError, Result};

/// Permute `0..n` with `seed` and cut it into `(train, validation)` index
/// sets. The first `round(n * validation_fraction)` permuted indices form the
/// validation set.
pub fn split_indices(
    n: usize,
    seed: u64,
    validation_fraction: f64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(PipelineError::InvalidArgument(format!(
            "validation_fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_val = ((n as f64) * validation_fraction).round() as usize;
    let train = order.split_off(n_val);
    Ok((train, order))
}

/// Split `dataset` into `(train, validation)`.
pub fn split(dataset: &Dataset, seed: u64, validation_fraction: f64) -> Result<(Dataset, Dataset)> {
    let (train, validation) = split_indices(dataset.len(), seed, validation_fraction)?;
    debug!(
        "Split {} rows into {} train / {} validation",
        dataset.len(),
        train.len(),
        validation.len()
    );
    Ok((dataset.select(&train), dataset.select(&validation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::numbered;
    use std::collections::HashSet;

    #[test]
    fn test_split_sizes_and_coverage() {
        let (train, val) = split_indices(10, 3, 0.2).unwrap();
        assert_eq!(val.len(), 2);
        assert_eq!(train.len(), 8);

        let all: HashSet<usize> = train.iter().chain(&val).copied().collect();
        assert_eq!(all.len(), 10);
        assert!(all.iter().all(|&i| i < 10));
    }

    #[test]
    fn test_split_is_deterministic() {
        assert_eq!(split_indices(100, 7, 0.25).unwrap(), split_indices(100, 7, 0.25).unwrap());
        assert_ne!(split_indices(100, 7, 0.25).unwrap(), split_indices(100, 8, 0.25).unwrap());
    }

    #[test]
    fn test_fraction_bounds() {
        for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let err = split_indices(10, 1, bad).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_split_dataset_rows_follow_ids() {
        let ds = numbered(20, 3);
        let (train, val) = split(&ds, 11, 0.3).unwrap();
        assert_eq!(train.len() + val.len(), 20);
        assert_eq!(val.len(), 6);

        let mut ids: Vec<usize> = train.ids().iter().chain(val.ids()).copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());

        // row content travels with its id
        let id = val.ids()[0];
        assert_eq!(
            val.feature_row(0),
            Some(crate::dataset::FeatureRow::Indices(&[id as u32; 3]))
        );
    }

    #[test]
    fn test_empty_dataset() {
        let (train, val) = split_indices(0, 1, 0.5).unwrap();
        assert!(train.is_empty() && val.is_empty());
    }
}
