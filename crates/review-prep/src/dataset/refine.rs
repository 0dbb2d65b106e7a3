//! Majority-class downsampling.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::types::{Record, TokenizedRecord};

/// Anything carrying a 1-10 rating.
pub trait Rated {
    fn rating(&self) -> u8;
}

impl Rated for Record {
    fn rating(&self) -> u8 {
        self.rating
    }
}

impl Rated for TokenizedRecord {
    fn rating(&self) -> u8 {
        self.rating
    }
}

/// What a refinement pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineOutcome {
    pub majority_rating: Option<u8>,
    pub before: usize,
    pub after: usize,
}

impl RefineOutcome {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }
}

/// Rating -> count.
pub fn class_distribution<T: Rated>(rows: &[T]) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.rating()).or_insert(0) += 1;
    }
    counts
}

/// The most frequent rating; ties go to the larger rating.
pub fn majority_rating<T: Rated>(rows: &[T]) -> Option<u8> {
    class_distribution(rows)
        .into_iter()
        .max_by_key(|&(rating, count)| (count, rating))
        .map(|(rating, _)| rating)
}

/// Keep `round(count * retention)` rows of the majority rating, chosen with
/// a generator seeded by `seed`. Every other row is kept and relative order
/// is preserved.
pub fn downsample_majority<T: Rated>(
    rows: Vec<T>,
    retention: f64,
    seed: u64,
) -> (Vec<T>, RefineOutcome) {
    let before = rows.len();
    let Some(majority) = majority_rating(&rows) else {
        return (rows, RefineOutcome::default());
    };

    let positions: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.rating() == majority)
        .map(|(i, _)| i)
        .collect();
    let keep_n = ((positions.len() as f64) * retention.clamp(0.0, 1.0)).round() as usize;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut keep = vec![true; rows.len()];
    for &position in &positions {
        keep[position] = false;
    }
    for chosen in index::sample(&mut rng, positions.len(), keep_n) {
        keep[positions[chosen]] = true;
    }

    let refined: Vec<T> = rows
        .into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();

    let outcome = RefineOutcome {
        majority_rating: Some(majority),
        before,
        after: refined.len(),
    };
    info!(
        "Downsampled rating {}: {} -> {} rows ({} removed)",
        majority,
        positions.len(),
        keep_n,
        outcome.removed()
    );
    (refined, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(ratings: &[u8]) -> Vec<Record> {
        ratings
            .iter()
            .enumerate()
            .map(|(i, &r)| Record::new(i, r, format!("r{}", i)))
            .collect()
    }

    #[test]
    fn test_majority_bucket_downsampled() {
        let (refined, outcome) =
            downsample_majority(records(&[10, 10, 10, 10, 10, 1, 2, 3, 4, 5]), 0.2, 1);

        assert_eq!(refined.len(), 6);
        assert_eq!(refined.iter().filter(|r| r.rating == 10).count(), 1);
        for rating in 1..=5 {
            assert_eq!(refined.iter().filter(|r| r.rating == rating).count(), 1);
        }
        assert_eq!(outcome.majority_rating, Some(10));
        assert_eq!(outcome.removed(), 4);
    }

    #[test]
    fn test_relative_order_preserved() {
        let (refined, _) = downsample_majority(records(&[3, 10, 1, 10, 10, 2, 10]), 0.5, 9);
        let ids: Vec<usize> = refined.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert!(ids.contains(&0) && ids.contains(&2) && ids.contains(&5));
    }

    #[test]
    fn test_reproducible_for_same_seed() {
        let input = records(&[7; 50]);
        let (a, _) = downsample_majority(input.clone(), 0.3, 42);
        let (b, _) = downsample_majority(input, 0.3, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 15);
    }

    #[test]
    fn test_retention_fraction_is_exact() {
        let mut ratings = vec![10u8; 1000];
        ratings.extend([1, 2, 3]);
        let (refined, _) = downsample_majority(records(&ratings), 0.2, 5);
        assert_eq!(refined.iter().filter(|r| r.rating == 10).count(), 200);
        assert_eq!(refined.len(), 203);
    }

    #[test]
    fn test_ties_break_to_larger_rating() {
        assert_eq!(majority_rating(&records(&[2, 2, 9, 9, 1])), Some(9));
    }

    #[test]
    fn test_empty_input() {
        let (refined, outcome) = downsample_majority(Vec::<Record>::new(), 0.2, 1);
        assert!(refined.is_empty());
        assert_eq!(outcome.majority_rating, None);
    }
}
