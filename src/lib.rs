//! Conditional dependency activation core for concurrent dataflow graphs.
//!
//! This crate executes DAGs of computation vertexes connected to typed data
//! slots, activating only the producers a requested output actually needs.
//! It:
//! - Walks backwards from requested outputs and schedules the minimum set
//!   of producers, skipping whole subgraphs behind unsatisfied boolean
//!   conditions.
//! - Coordinates each edge through a single signed atomic counter whose
//!   terminal value encodes which of the activation/completion races
//!   occurred, so activation, condition resolution and target completion
//!   may interleave freely across threads.
//! - Arbitrates every data slot between one exclusive-mutable consumer or
//!   any number of shared readers.
//! - Ships the sharded counter primitives (`ConcurrentAdder`,
//!   `ConcurrentMaxer`, `ConcurrentSummer`) used for many-writer,
//!   rare-reader bookkeeping, built on enumerable per-thread slots.
//!
//! Key modules:
//! - `graph`: the graph itself — builder, data slots, vertexes, the edge
//!   activation state machine, and the rayon-backed execution driver.
//! - `concurrent`: thread-local slot storage and the counters on top.
//! - `logging`: severity-gated logging with a pluggable stream provider.
//!
//! Quick start:
//! 1. Assemble a [`GraphBuilder`]: one `vertex(name, processor)` per
//!    computation, declaring `depend(..)` edges (optionally gated with
//!    `condition(..)`) and typed `emit::<T>(..)` outputs.
//! 2. `build()` the [`Graph`], `preset` any external inputs, and `run`
//!    it naming the outputs you need.
//! 3. Read results back through [`Graph::data`] accessors.
//!
//! Executions are repeatable: [`Graph::reset`] opens a fresh epoch and the
//! same activation and completion sequence reaches the same terminal state.

/// Sharded counters and the enumerable thread-local storage beneath them.
pub mod concurrent;
/// Graph construction, data/vertex/edge model, and the execution driver.
pub mod graph;
/// Severity-gated logging with a pluggable stream provider.
pub mod logging;
mod sync;

pub use concurrent::{ConcurrentAdder, ConcurrentMaxer, ConcurrentSummer, Summary};
pub use graph::builder::{DependencyBuilder, GraphBuilder, VertexBuilder};
pub use graph::closure::Closure;
pub use graph::data::{GraphData, MutableValue};
pub use graph::dependency::GraphDependency;
pub use graph::vertex::{GraphProcessor, GraphVertex, VertexRun};
pub use graph::{DataIndex, DataStack, Graph, GraphError, VertexIndex, VertexStack};
