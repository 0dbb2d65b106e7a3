//! Shuffled mini-batch iteration.
//!
//! A [`BatchIterator`] is reusable across epochs. Each call to
//! [`BatchIterator::iterate`] reshuffles the row order and hands out a
//! lazy [`Epoch`] of full batches; the trailing `N % batch_size` rows of
//! that shuffle are left out of the epoch.
//!
//! Iteration takes `&mut self`, so one instance has exactly one consumer at
//! a time. Sharing an instance between threads needs external locking and
//! is not supported.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Dataset, Features};
use crate::error::{PipelineError, Result};

/// Where an iterator is in its epoch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochState {
    /// No epoch in progress.
    Idle,
    /// An epoch handle exists and has batches left.
    Running,
    /// The current epoch has yielded its last full batch.
    Done,
}

/// One mini-batch, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Source record ids of the rows.
    pub ids: Vec<usize>,
    /// `(batch_size, feature_width)` features.
    pub x: Features,
    /// `(batch_size, label_width)` labels.
    pub y: Vec<f32>,
    pub feature_width: usize,
    pub label_width: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn x_shape(&self) -> (usize, usize) {
        (self.len(), self.feature_width)
    }

    pub fn y_shape(&self) -> (usize, usize) {
        (self.len(), self.label_width)
    }
}

/// Epoch-wise shuffled batches over a dataset.
#[derive(Debug)]
pub struct BatchIterator<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    epochs_started: u64,
    state: EpochState,
}

impl<'a> BatchIterator<'a> {
    /// With `shuffle_seed`, epoch `k` (0-based) shuffles with `seed + k`, so
    /// a run is reproducible while epochs still differ. Without it, every
    /// epoch draws fresh entropy.
    pub fn new(dataset: &'a Dataset, batch_size: usize, shuffle_seed: Option<u64>) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::InvalidArgument(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle_seed,
            epochs_started: 0,
            state: EpochState::Idle,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Full batches in every epoch.
    pub fn batches_per_epoch(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    pub fn epochs_started(&self) -> u64 {
        self.epochs_started
    }

    pub fn state(&self) -> EpochState {
        self.state
    }

    /// Start a new epoch.
    pub fn iterate(&mut self) -> Epoch<'_, 'a> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        match self.shuffle_seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(self.epochs_started));
                order.shuffle(&mut rng);
            }
            None => order.shuffle(&mut StdRng::from_entropy()),
        }

        let n_batches = self.batches_per_epoch();
        debug!(
            "Epoch {}: {} batches of {} ({} rows left out)",
            self.epochs_started,
            n_batches,
            self.batch_size,
            self.dataset.len() - n_batches * self.batch_size
        );

        self.epochs_started += 1;
        self.state = if n_batches == 0 {
            EpochState::Done
        } else {
            EpochState::Running
        };

        Epoch {
            owner: self,
            order,
            next_batch: 0,
            n_batches,
        }
    }
}

/// A single pass of full batches. Dropping it returns the iterator to
/// [`EpochState::Idle`].
#[derive(Debug)]
pub struct Epoch<'it, 'a> {
    owner: &'it mut BatchIterator<'a>,
    order: Vec<usize>,
    next_batch: usize,
    n_batches: usize,
}

impl Epoch<'_, '_> {
    pub fn state(&self) -> EpochState {
        self.owner.state
    }

    /// The row order of this epoch, including the left-out tail.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for Epoch<'_, '_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.next_batch >= self.n_batches {
            return None;
        }
        let size = self.owner.batch_size;
        let start = self.next_batch * size;
        let rows = &self.order[start..start + size];
        self.next_batch += 1;

        let (ids, x, y) = self.owner.dataset.gather(rows);
        if self.next_batch == self.n_batches {
            self.owner.state = EpochState::Done;
        }
        Some(Batch {
            ids,
            x,
            y,
            feature_width: self.owner.dataset.feature_width(),
            label_width: self.owner.dataset.label_width(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.n_batches - self.next_batch;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Epoch<'_, '_> {}

impl Drop for Epoch<'_, '_> {
    fn drop(&mut self) {
        self.owner.state = EpochState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::numbered;
    use std::collections::HashSet;

    #[test]
    fn test_remainder_dropped() {
        let ds = numbered(10, 2);
        let mut batches = BatchIterator::new(&ds, 4, Some(1)).unwrap();
        let epoch: Vec<Batch> = batches.iterate().collect();

        assert_eq!(epoch.len(), 2);
        for batch in &epoch {
            assert_eq!(batch.x_shape(), (4, 2));
            assert_eq!(batch.y_shape(), (4, 1));
        }
        let seen: HashSet<usize> = epoch.iter().flat_map(|b| b.ids.clone()).collect();
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn test_batches_cover_each_row_at_most_once() {
        let ds = numbered(103, 1);
        let mut batches = BatchIterator::new(&ds, 10, None).unwrap();
        let mut seen = HashSet::new();
        for batch in batches.iterate() {
            for id in batch.ids {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_rows_stay_aligned_with_labels() {
        let ds = numbered(30, 3);
        let mut batches = BatchIterator::new(&ds, 7, Some(5)).unwrap();
        for batch in batches.iterate() {
            let Features::Indices(x) = &batch.x else {
                panic!("expected index features");
            };
            for (row, id) in batch.ids.iter().enumerate() {
                assert_eq!(x[row * 3], *id as u32);
                assert_eq!(batch.y[row], (id % 10 + 1) as f32);
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let ds = numbered(8, 1);
        let mut batches = BatchIterator::new(&ds, 4, Some(0)).unwrap();
        assert_eq!(batches.state(), EpochState::Idle);

        {
            let mut epoch = batches.iterate();
            assert_eq!(epoch.state(), EpochState::Running);
            assert_eq!(epoch.len(), 2);
            epoch.next();
            assert_eq!(epoch.state(), EpochState::Running);
            epoch.next();
            assert_eq!(epoch.state(), EpochState::Done);
            assert!(epoch.next().is_none());
        }
        assert_eq!(batches.state(), EpochState::Idle);
        assert_eq!(batches.epochs_started(), 1);
    }

    #[test]
    fn test_seeded_epochs_reproducible_and_distinct() {
        let ds = numbered(50, 1);
        let orders = |seed| {
            let mut batches = BatchIterator::new(&ds, 5, Some(seed)).unwrap();
            let first = batches.iterate().order().to_vec();
            let second = batches.iterate().order().to_vec();
            (first, second)
        };
        let (a1, a2) = orders(9);
        let (b1, b2) = orders(9);
        assert_eq!(a1, b1);
        assert_eq!(a2, b2);
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let ds = numbered(3, 1);
        let err = BatchIterator::new(&ds, 0, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[test]
    fn test_batch_larger_than_dataset() {
        let ds = numbered(3, 1);
        let mut batches = BatchIterator::new(&ds, 4, None).unwrap();
        let mut epoch = batches.iterate();
        assert_eq!(epoch.state(), EpochState::Done);
        assert!(epoch.next().is_none());
    }
}
