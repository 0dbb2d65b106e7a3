//! Available-memory floor checks for heavy preprocessing stages.

use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};

/// Source of the current amount of available system memory.
pub trait MemoryProbe: Send + Sync {
    /// Available memory in MiB, or `None` when it cannot be determined.
    fn available_mb(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from `/proc/meminfo`.
///
/// On platforms without procfs the probe reports `None` and the floor
/// check is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_mb(&self) -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_mem_available_kb(&meminfo).map(|kb| kb / 1024)
    }
}

fn parse_mem_available_kb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Fails a stage when available memory drops below `floor_mb`.
#[derive(Clone)]
pub struct MemoryGuard {
    floor_mb: u64,
    probe: Arc<dyn MemoryProbe>,
}

static_assertions::assert_impl_all!(MemoryGuard: Send, Sync);

impl MemoryGuard {
    pub fn new(floor_mb: u64, probe: Arc<dyn MemoryProbe>) -> Self {
        Self { floor_mb, probe }
    }

    /// Guard backed by the operating system's memory counters.
    pub fn system(floor_mb: u64) -> Self {
        Self::new(floor_mb, Arc::new(SystemMemory))
    }

    /// Guard that never fails.
    pub fn disabled() -> Self {
        Self::system(0)
    }

    pub fn floor_mb(&self) -> u64 {
        self.floor_mb
    }

    /// Check the floor once.
    pub fn check(&self) -> Result<()> {
        if self.floor_mb == 0 {
            return Ok(());
        }
        match self.probe.available_mb() {
            Some(available_mb) if available_mb < self.floor_mb => {
                error!(
                    "Not enough memory: {} MiB available, floor is {} MiB",
                    available_mb, self.floor_mb
                );
                Err(PipelineError::ResourceExhausted {
                    available_mb,
                    floor_mb: self.floor_mb,
                })
            }
            Some(_) => Ok(()),
            None => {
                debug!("Available memory unknown; skipping floor check");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("floor_mb", &self.floor_mb)
            .finish_non_exhaustive()
    }
}
