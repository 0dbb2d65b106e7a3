//! Sharded tokenization over a fixed worker pool.
//!
//! Records are cut into contiguous shards, one per worker. Each worker
//! sends its finished shard back over a channel tagged with the shard
//! index; the collector slots results by index and only concatenates once
//! every worker has joined, so output order always equals input order and
//! no partial result ever escapes.

use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::memory::MemoryGuard;
use crate::pipeline::progress::{PipelineStage, ProgressReporter, ProgressUpdate};
use crate::text::tokenizer::TextProcessor;
use crate::types::{Record, TokenizedRecord};

type ShardResult = (usize, Result<Vec<TokenizedRecord>>);

/// Tokenize `records` on up to `n_workers` threads, preserving order.
///
/// The memory floor is checked at the start of each shard and after every
/// 1% of it; a breach in any worker fails the whole call.
pub fn tokenize_records(
    records: &[Record],
    processor: &TextProcessor,
    n_workers: usize,
    guard: &MemoryGuard,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<Vec<TokenizedRecord>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let n_workers = n_workers.clamp(1, records.len());
    let shard_size = records.len().div_ceil(n_workers);
    let shards: Vec<&[Record]> = records.chunks(shard_size).collect();
    let n_shards = shards.len();

    info!(
        "Tokenizing {} records in {} shards of up to {}",
        records.len(),
        n_shards,
        shard_size
    );

    let mut slots: Vec<Option<Vec<TokenizedRecord>>> = (0..n_shards).map(|_| None).collect();
    let mut first_error: Option<(usize, PipelineError)> = None;

    thread::scope(|scope| -> Result<()> {
        let (tx, rx) = mpsc::channel::<ShardResult>();
        let mut handles = Vec::with_capacity(n_shards);

        for (shard_index, shard) in shards.iter().copied().enumerate() {
            let tx = tx.clone();
            handles.push(scope.spawn(move || {
                let result = tokenize_shard(shard_index, shard, processor, guard);
                // the collector outlives every worker, so this cannot fail
                let _ = tx.send((shard_index, result));
            }));
        }
        drop(tx);

        let mut finished = 0;
        for (shard_index, result) in rx {
            finished += 1;
            match result {
                Ok(tokenized) => slots[shard_index] = Some(tokenized),
                Err(e) => {
                    if first_error
                        .as_ref()
                        .is_none_or(|(index, _)| shard_index < *index)
                    {
                        first_error = Some((shard_index, e));
                    }
                }
            }
            if let Some(reporter) = reporter {
                reporter.report(ProgressUpdate::with_items(
                    PipelineStage::Tokenizing,
                    format!("Shard {}", shard_index + 1),
                    finished,
                    n_shards,
                    format!("Tokenized shard {}/{}", finished, n_shards),
                ));
            }
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| PipelineError::Internal("tokenizer worker panicked".to_string()))?;
        }
        Ok(())
    })?;

    if let Some((shard_index, e)) = first_error {
        return Err(e.with_context(format!("tokenizer shard {}", shard_index)));
    }

    let mut tokenized = Vec::with_capacity(records.len());
    for (shard_index, slot) in slots.into_iter().enumerate() {
        let shard = slot.ok_or_else(|| {
            PipelineError::Internal(format!("shard {} produced no result", shard_index))
        })?;
        tokenized.extend(shard);
    }
    Ok(tokenized)
}

fn tokenize_shard(
    shard_index: usize,
    shard: &[Record],
    processor: &TextProcessor,
    guard: &MemoryGuard,
) -> Result<Vec<TokenizedRecord>> {
    guard.check()?;

    let check_every = (shard.len() / 100).max(1);
    let mut out = Vec::with_capacity(shard.len());

    for (i, record) in shard.iter().enumerate() {
        out.push(TokenizedRecord {
            id: record.id,
            rating: record.rating,
            tokens: processor.process(&record.comment),
        });

        if (i + 1) % check_every == 0 {
            guard.check()?;
        }
    }

    debug!("Shard {} done: {} records", shard_index, out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProbe;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i, (i % 10 + 1) as u8, format!("word{} 영화", i)))
            .collect()
    }

    #[test]
    fn test_order_preserved_across_shards() {
        let input = records(103);
        let out = tokenize_records(
            &input,
            &TextProcessor::default(),
            4,
            &MemoryGuard::disabled(),
            None,
        )
        .unwrap();

        assert_eq!(out.len(), 103);
        for (record, tokenized) in input.iter().zip(&out) {
            assert_eq!(record.id, tokenized.id);
            assert_eq!(record.rating, tokenized.rating);
        }
        assert_eq!(out[57].tokens[0].text, "word");
        assert_eq!(out[57].tokens[1].text, "57");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let input = records(40);
        let processor = TextProcessor::default();
        let guard = MemoryGuard::disabled();
        let one = tokenize_records(&input, &processor, 1, &guard, None).unwrap();
        let many = tokenize_records(&input, &processor, 7, &guard, None).unwrap();
        assert_eq!(one, many);
    }

    #[test]
    fn test_more_workers_than_records() {
        let input = records(2);
        let out = tokenize_records(
            &input,
            &TextProcessor::default(),
            16,
            &MemoryGuard::disabled(),
            None,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let out = tokenize_records(
            &[],
            &TextProcessor::default(),
            4,
            &MemoryGuard::disabled(),
            None,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    struct Low;

    impl MemoryProbe for Low {
        fn available_mb(&self) -> Option<u64> {
            Some(10)
        }
    }

    #[test]
    fn test_memory_floor_aborts_stage() {
        let guard = MemoryGuard::new(256, Arc::new(Low));
        let err = tokenize_records(&records(20), &TextProcessor::default(), 3, &guard, None)
            .unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    struct Counting(AtomicUsize);

    impl ProgressReporter for Counting {
        fn report(&self, update: ProgressUpdate) {
            assert_eq!(update.stage, PipelineStage::Tokenizing);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reports_once_per_shard() {
        let reporter = Counting(AtomicUsize::new(0));
        tokenize_records(
            &records(30),
            &TextProcessor::default(),
            3,
            &MemoryGuard::disabled(),
            Some(&reporter),
        )
        .unwrap();
        assert_eq!(reporter.0.load(Ordering::SeqCst), 3);
    }
}
