use core::sync::atomic::{fence, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use crate::concurrent::thread_local::EnumerableThreadLocal;

/// High-concurrency accumulating counter.
///
/// Equivalent in principle to `fetch_add` on one shared atomic, but writes
/// land on the calling thread's own cache-line-padded slot, so heavily
/// contended counting never bounces a cache line. The price is paid by the
/// rare reader, which walks and sums every slot.
pub struct ConcurrentAdder {
    storage: EnumerableThreadLocal<AtomicI64>,
}

impl ConcurrentAdder {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: EnumerableThreadLocal::new(),
        }
    }

    /// Add `value` (which may be negative) to the counter.
    #[inline]
    pub fn add(&self, value: i64) {
        let local = self.storage.local();
        // The owning thread is the slot's only writer, so a relaxed
        // load/store pair is enough; the store itself stays atomic for
        // concurrent enumerating readers.
        local.store(local.load(Ordering::Relaxed) + value, Ordering::Relaxed);
    }

    /// Sum of every write since construction or the last [`reset`](Self::reset).
    #[must_use]
    pub fn value(&self) -> i64 {
        let mut sum = 0;
        self.storage.for_each(|slot| sum += slot.load(Ordering::Relaxed));
        sum
    }

    /// Clear all slots. Callers must quiesce writers around the reset;
    /// a write racing it may or may not be kept.
    pub fn reset(&self) {
        self.storage.for_each(|slot| slot.store(0, Ordering::Relaxed));
    }
}

impl Default for ConcurrentAdder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MaxerSlot {
    version: AtomicUsize,
    value: AtomicI64,
}

/// High-concurrency maximum tracker with epoch reset.
///
/// Writes land on per-thread slots tagged with the counter's current epoch
/// version; [`reset`](Self::reset) just bumps the version, which invalidates
/// every slot without touching it. A write racing the bump may be tagged
/// with the closed epoch and dropped from the next read; that weakening is
/// deliberate and acceptable for statistics.
pub struct ConcurrentMaxer {
    storage: EnumerableThreadLocal<MaxerSlot>,
    version: AtomicUsize,
}

impl ConcurrentMaxer {
    /// Create a tracker with an open, empty epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: EnumerableThreadLocal::new(),
            // Default slots carry version 0; starting at 1 keeps them stale.
            version: AtomicUsize::new(1),
        }
    }

    /// Record one sample.
    #[inline]
    pub fn observe(&self, value: i64) {
        let slot = self.storage.local();
        let version = self.version.load(Ordering::Relaxed);
        if slot.version.load(Ordering::Relaxed) != version {
            slot.value.store(value, Ordering::Relaxed);
            // Publish the value before the version that makes it visible.
            slot.version.store(version, Ordering::Release);
        } else if value > slot.value.load(Ordering::Relaxed) {
            slot.value.store(value, Ordering::Relaxed);
        }
    }

    /// Maximum sample of the current epoch, or `None` when the epoch has
    /// no samples.
    #[must_use]
    pub fn try_value(&self) -> Option<i64> {
        let version = self.version.load(Ordering::Relaxed);
        let mut max = None;
        self.storage.for_each(|slot| {
            if slot.version.load(Ordering::Acquire) == version {
                let value = slot.value.load(Ordering::Relaxed);
                max = Some(max.map_or(value, |current: i64| current.max(value)));
            }
        });
        max
    }

    /// Maximum sample of the current epoch, or 0 when it has no samples.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.try_value().unwrap_or(0)
    }

    /// Open a new epoch.
    pub fn reset(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ConcurrentMaxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated result of a [`ConcurrentSummer`]: total and sample count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Sum of all recorded values.
    pub sum: i64,
    /// Number of recorded samples.
    pub num: u64,
}

#[derive(Default)]
struct SummerSlot {
    sequence: AtomicUsize,
    sum: AtomicI64,
    num: AtomicU64,
}

/// High-concurrency `{sum, num}` recorder.
///
/// The per-slot pair must be observed consistently by enumerating readers.
/// Rust offers no portable 16-byte atomic store, so each slot publishes
/// through a sequence lock: the single writer brackets its two stores with
/// an odd/even sequence, and a reader retries while it observes an odd or
/// changed sequence. Readers therefore only ever spin for the duration of
/// one in-flight write.
pub struct ConcurrentSummer {
    storage: EnumerableThreadLocal<SummerSlot>,
}

impl ConcurrentSummer {
    /// Create a recorder with no samples.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: EnumerableThreadLocal::new(),
        }
    }

    /// Record one sample: `sum += value; num += 1`.
    #[inline]
    pub fn observe(&self, value: i64) {
        self.observe_summary(Summary { sum: value, num: 1 });
    }

    /// Merge a pre-aggregated batch: `sum += delta.sum; num += delta.num`.
    pub fn observe_summary(&self, delta: Summary) {
        let slot = self.storage.local();
        let sequence = slot.sequence.load(Ordering::Relaxed);
        // Seqlock write side: odd marks the pair unstable. The release
        // fence keeps the data stores after the odd sequence store; the
        // final release store keeps them before the even one.
        slot.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        slot.sum
            .store(slot.sum.load(Ordering::Relaxed) + delta.sum, Ordering::Relaxed);
        slot.num
            .store(slot.num.load(Ordering::Relaxed) + delta.num, Ordering::Relaxed);
        slot.sequence.store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Total and sample count across all threads.
    #[must_use]
    pub fn value(&self) -> Summary {
        let mut total = Summary::default();
        self.storage.for_each(|slot| {
            let sample = read_stable(slot);
            total.sum += sample.sum;
            total.num += sample.num;
        });
        total
    }
}

impl Default for ConcurrentSummer {
    fn default() -> Self {
        Self::new()
    }
}

/// Seqlock read side: retry until a stable (even, unchanged) sequence
/// brackets the pair.
fn read_stable(slot: &SummerSlot) -> Summary {
    loop {
        let before = slot.sequence.load(Ordering::Acquire);
        if before & 1 == 0 {
            let sum = slot.sum.load(Ordering::Relaxed);
            let num = slot.num.load(Ordering::Relaxed);
            // Order the data loads before the sequence re-check.
            fence(Ordering::Acquire);
            if slot.sequence.load(Ordering::Relaxed) == before {
                return Summary { sum, num };
            }
        }
        core::hint::spin_loop();
    }
}
