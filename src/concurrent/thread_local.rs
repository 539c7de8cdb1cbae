use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use parking_lot::Mutex;

/// Buckets of doubling size: bucket `b` holds `1 << b` slots, so 24 buckets
/// cover 16M concurrently live threads.
const BUCKET_NUM: usize = 24;

static NEXT_INDEX: AtomicUsize = AtomicUsize::new(0);
static FREE_INDEXES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

/// Compact per-thread index, returned to the free list when the thread
/// exits so slot storage stays proportional to the peak thread count.
struct RegisteredIndex(usize);

impl RegisteredIndex {
    fn acquire() -> Self {
        if let Some(index) = FREE_INDEXES.lock().pop() {
            return Self(index);
        }
        Self(NEXT_INDEX.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for RegisteredIndex {
    fn drop(&mut self) {
        FREE_INDEXES.lock().push(self.0);
    }
}

thread_local! {
    static THREAD_INDEX: RegisteredIndex = RegisteredIndex::acquire();
}

fn current_thread_index() -> usize {
    THREAD_INDEX.with(|index| index.0)
}

#[repr(align(64))]
#[derive(Default)]
struct Slot<T>(T);

/// Per-thread slot storage with enumerable read.
///
/// Each live thread owns one cache-line-aligned slot per instance; a writer
/// touches only its own slot, while an aggregating reader walks every
/// allocated slot with [`for_each`](Self::for_each). Slots are reachable
/// through power-of-two buckets published lazily with a compare-exchange,
/// so the write path never takes a lock.
///
/// `T` must make do with `&self` access (in practice: atomics), and its
/// `Default` value must be a no-op for the aggregation, because readers
/// also visit slots no thread has written yet.
pub struct EnumerableThreadLocal<T> {
    buckets: [AtomicPtr<Slot<T>>; BUCKET_NUM],
}

unsafe impl<T: Send> Send for EnumerableThreadLocal<T> {}
unsafe impl<T: Sync> Sync for EnumerableThreadLocal<T> {}

impl<T: Default> EnumerableThreadLocal<T> {
    /// Create storage with no slots allocated yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: [const { AtomicPtr::new(ptr::null_mut()) }; BUCKET_NUM],
        }
    }

    /// The slot owned by the calling thread.
    #[inline]
    pub fn local(&self) -> &T {
        let index = current_thread_index();
        let (bucket, offset) = bucket_of(index);
        &self.bucket_slots(bucket)[offset].0
    }

    /// Visit every allocated slot, including slots of exited threads and
    /// never-written default slots.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for (bucket, slots) in self.buckets.iter().enumerate() {
            let head = slots.load(Ordering::Acquire);
            if head.is_null() {
                continue;
            }
            // SAFETY: a published bucket pointer refers to `1 << bucket`
            // live slots until `self` is dropped.
            let slots = unsafe { core::slice::from_raw_parts(head, 1 << bucket) };
            for slot in slots {
                f(&slot.0);
            }
        }
    }

    fn bucket_slots(&self, bucket: usize) -> &[Slot<T>] {
        assert!(bucket < BUCKET_NUM, "EnumerableThreadLocal: [1]");
        let len = 1usize << bucket;
        let mut head = self.buckets[bucket].load(Ordering::Acquire);
        if head.is_null() {
            let fresh: Box<[Slot<T>]> = (0..len).map(|_| Slot(T::default())).collect();
            let fresh = Box::into_raw(fresh).cast::<Slot<T>>();
            match self.buckets[bucket].compare_exchange(
                ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => head = fresh,
                Err(published) => {
                    // Another thread published this bucket first.
                    // SAFETY: `fresh` was allocated above with `len` slots
                    // and never shared.
                    drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len)) });
                    head = published;
                }
            }
        }
        // SAFETY: as in `for_each`.
        unsafe { core::slice::from_raw_parts(head, len) }
    }
}

impl<T: Default> Default for EnumerableThreadLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for EnumerableThreadLocal<T> {
    fn drop(&mut self) {
        for (bucket, slots) in self.buckets.iter_mut().enumerate() {
            let head = *slots.get_mut();
            if !head.is_null() {
                // SAFETY: `head` was published by `bucket_slots` from a
                // boxed slice of `1 << bucket` slots, and `&mut self`
                // guarantees no reader is live.
                drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(head, 1 << bucket)) });
            }
        }
    }
}

/// Map a thread index to its bucket and the offset inside that bucket.
/// Index 0 lands in bucket 0; bucket `b` starts at index `(1 << b) - 1`.
#[inline]
fn bucket_of(index: usize) -> (usize, usize) {
    let bucket = (index + 1).ilog2() as usize;
    (bucket, index + 1 - (1 << bucket))
}
