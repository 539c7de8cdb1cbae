/// Sharded write, aggregated read counters built on the thread-local slots.
pub mod counter;
/// Per-thread slot storage with enumerable read.
pub mod thread_local;

pub use counter::{ConcurrentAdder, ConcurrentMaxer, ConcurrentSummer, Summary};
pub use thread_local::EnumerableThreadLocal;
