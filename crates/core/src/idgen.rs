//! Globally unique, monotonically increasing task identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EngineError;

const TIME_EPOCH_MS: u64 = 1_700_385_319_003;
const TIME_BITS: u32 = 41;
const SEQ_BITS: u32 = 12;
const WORKER_BITS: u32 = 10;
const TIME_SHIFT: u32 = SEQ_BITS + WORKER_BITS;
const SEQ_UNIT: u64 = 1 << WORKER_BITS;
const TIME_MASK: u64 = ((1 << TIME_BITS) - 1) << TIME_SHIFT;

/// Largest worker id representable in the 10-bit worker field.
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Lock-free generator of 64-bit ids laid out as
/// `[41 time bits | 12 sequence bits | 10 worker bits]`.
///
/// Ids returned by one instance are strictly increasing and never repeat,
/// even under concurrent callers. When the wall clock steps backwards the
/// sequence field keeps ids ordered until time catches up again.
pub struct IdGen {
    clock: Clock,
    worker_id: u16,
    last_id: AtomicU64,
}

impl IdGen {
    /// Generator backed by the wall clock.
    pub fn new(worker_id: u16) -> Self {
        Self::with_clock(
            Box::new(|| chrono::Utc::now().timestamp_millis() as u64),
            worker_id,
        )
    }

    /// Generator with an injected millisecond clock.
    pub fn with_clock(clock: Clock, worker_id: u16) -> Self {
        debug_assert!(worker_id <= MAX_WORKER_ID);
        Self {
            clock,
            worker_id,
            last_id: AtomicU64::new(0),
        }
    }

    /// Next id, or [`EngineError::IdOverflow`] when more than 4096 ids were
    /// requested within one millisecond.
    pub fn next_id(&self) -> Result<u64, EngineError> {
        let now = (self.clock)().saturating_sub(TIME_EPOCH_MS);
        let min_id = (now << TIME_SHIFT) | u64::from(self.worker_id);
        loop {
            let last = self.last_id.load(Ordering::Acquire);
            let id = if min_id > last {
                min_id
            } else {
                let next = last + SEQ_UNIT;
                // A carry out of the sequence field would corrupt the time
                // field; refuse the id instead.
                if next & TIME_MASK != last & TIME_MASK {
                    return Err(EngineError::IdOverflow);
                }
                next
            };
            if self
                .last_id
                .compare_exchange(last, id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(id);
            }
        }
    }
}
