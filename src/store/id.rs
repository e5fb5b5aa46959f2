//! Execution id generation

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of unique ids for executions, node rows and interrupt events
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;
}

const RANDOM_BITS: u32 = 12;

/// Millisecond timestamp in the high bits, random low bits, never decreasing
#[derive(Debug, Default)]
pub struct SnowflakeIdGenerator {
    last: AtomicI64,
}

impl SnowflakeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn candidate() -> i64 {
        let millis = chrono::Utc::now().timestamp_millis();
        let low = rand::random::<u16>() as i64 & ((1 << RANDOM_BITS) - 1);
        (millis << RANDOM_BITS) | low
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> i64 {
        let candidate = Self::candidate();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = candidate.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}
