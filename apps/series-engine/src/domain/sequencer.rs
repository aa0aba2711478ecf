//! Process-Wide Bar Sequencer
//!
//! Produces the strictly increasing sequence numbers stamped onto every
//! finalized bar. The sequence is shared by all series, so buffers and
//! resumption cursors can totally order bars across series.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence source, safe under concurrent callers.
///
/// Starts at a fixed origin each process start: the first `next()` returns 1.
/// Overflow of the 64-bit counter is treated as unreachable.
#[derive(Debug, Default)]
pub struct Sequencer {
    counter: AtomicU64,
}

impl Sequencer {
    /// Create a sequencer at the process-start origin.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Return the next sequence number, strictly greater than all previous.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last issued sequence number (0 if none issued yet). Diagnostic only.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
