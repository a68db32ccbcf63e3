//! Thread-safe transaction counter for `sendir` commands.
//!
//! # What is the IR transaction id? (for beginners)
//!
//! Every `sendir` command carries an id that the controller echoes back in its
//! `completeir` reply.  Matching the two lets a log reader tie a completion to
//! the request that caused it.  The controller accepts ids from 0 to 65535;
//! this counter hands out 1, 2, 3, ... and wraps from 65535 back to 1.
//!
//! # Thread safety
//!
//! The counter is an `AtomicU32` updated with a compare-and-swap loop, so
//! concurrent callers never receive the same id twice in one cycle and no lock
//! is needed.

use std::sync::atomic::{AtomicU32, Ordering};

/// First id handed out, and the value the counter wraps back to.
const FIRST_ID: u32 = 1;

/// Largest id the controller accepts.
const MAX_ID: u32 = 65_535;

/// A thread-safe counter for IR transaction ids.
///
/// # Examples
///
/// ```rust
/// use gc_core::protocol::IrTransactionCounter;
///
/// let counter = IrTransactionCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct IrTransactionCounter {
    inner: AtomicU32,
}

impl IrTransactionCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU32::new(FIRST_ID),
        }
    }

    /// Returns the next transaction id and advances the counter.
    ///
    /// `Ordering::Relaxed` is enough: ids only label commands, they do not
    /// publish any other memory.
    pub fn next(&self) -> u32 {
        let previous = self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id >= MAX_ID { FIRST_ID } else { id + 1 })
            });
        // The closure always returns Some, so both arms carry the old value.
        match previous {
            Ok(id) | Err(id) => id,
        }
    }

    /// Returns the id the next call to [`next`](Self::next) will hand out.
    pub fn peek(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for IrTransactionCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_starts_at_one() {
        // Arrange
        let counter = IrTransactionCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 1);
        assert_eq!(counter.peek(), 2);
    }

    #[test]
    fn test_counter_increments_by_one() {
        let counter = IrTransactionCounter::new();
        let values: Vec<u32> = (0..5).map(|_| counter.next()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_counter_wraps_from_max_back_to_one() {
        // Arrange – start the counter at the last valid id
        let counter = IrTransactionCounter {
            inner: AtomicU32::new(MAX_ID),
        };

        // Act
        let last = counter.next();
        let wrapped = counter.next();

        // Assert – 0 is never handed out
        assert_eq!(last, MAX_ID);
        assert_eq!(wrapped, 1);
    }

    #[test]
    fn test_counter_is_unique_across_threads() {
        // Arrange
        let counter = Arc::new(IrTransactionCounter::new());
        let threads = 8;
        let per_thread = 500;

        // Act
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..per_thread).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} was handed out twice");
            }
        }

        // Assert
        assert_eq!(seen.len(), threads * per_thread);
    }
}
