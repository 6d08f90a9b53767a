//! Cooperative time and memory ceilings for one batch computation

use sieve_catalog::VirtualFieldDefinition;
use sieve_core::{ComputationConfig, ComputationError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Checked between entities, never preemptively. Per-field limits override
/// the deployment defaults.
#[derive(Debug)]
pub struct Budget {
    field: String,
    started: Instant,
    time_limit: Duration,
    memory_limit: usize,
    used: AtomicUsize,
}

impl Budget {
    pub fn new(field: &VirtualFieldDefinition, config: &ComputationConfig) -> Self {
        Self {
            field: field.name.clone(),
            started: Instant::now(),
            time_limit: field.timeout.unwrap_or_else(|| config.time_limit()),
            memory_limit: field.memory_limit.unwrap_or(config.memory_limit_bytes),
            used: AtomicUsize::new(0),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.time_limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn check_time(&self) -> Result<(), ComputationError> {
        let elapsed = self.elapsed();
        if elapsed > self.time_limit {
            return Err(ComputationError::TimeoutExceeded {
                field: self.field.clone(),
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.time_limit.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Account for a computed value's estimated footprint
    pub fn charge(&self, bytes: usize) -> Result<(), ComputationError> {
        let used = self.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if used > self.memory_limit {
            return Err(ComputationError::MemoryLimitExceeded {
                field: self.field.clone(),
                used_bytes: used,
                limit_bytes: self.memory_limit,
            });
        }
        Ok(())
    }
}
