use crate::sync::{AtomicI64, Ordering};
use std::sync::Arc;

/// Sentinel for "no finish recorded yet"; real codes are `i32`.
const UNFINISHED: i64 = i64::MIN;

/// Per-execution completion handle shared by every vertex of a graph.
///
/// The first [`finish`](Self::finish) wins; later calls are ignored so a
/// fatal code reported from one edge is never overwritten by another racing
/// failure (or by the success path). Workers consult
/// [`finished`](Self::finished) before running a vertex, which is how a
/// nonzero code short-circuits the rest of an execution.
#[derive(Clone, Debug)]
#[must_use]
pub struct Closure {
    code: Arc<AtomicI64>,
}

impl Closure {
    /// A fresh, unfinished handle.
    pub fn new() -> Self {
        Self {
            code: Arc::new(AtomicI64::new(UNFINISHED)),
        }
    }

    /// Record the completion code. Returns whether this call was the one
    /// that finished the execution.
    pub fn finish(&self, code: i32) -> bool {
        self.code
            .compare_exchange(
                UNFINISHED,
                i64::from(code),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The recorded completion code, if any.
    #[must_use]
    pub fn finished(&self) -> Option<i32> {
        match self.code.load(Ordering::Acquire) {
            UNFINISHED => None,
            code => Some(code as i32),
        }
    }
}

impl Default for Closure {
    fn default() -> Self {
        Self::new()
    }
}
