use derive_more::Debug;

use crate::graph::closure::Closure;
use crate::graph::data::MutableValue;
use crate::graph::dependency::GraphDependency;
use crate::graph::{DataIndex, DataStack, Graph, GraphError, VertexIndex, VertexStack};
use crate::sync::{AtomicBool, AtomicI64, Ordering};

/// User computation bound to a vertex.
///
/// `process` runs once per execution, after every essential dependency has
/// become ready. It reads inputs and writes outputs through the
/// [`VertexRun`] handle and reports success with `0`; any other code
/// finishes the execution's [`Closure`] and suppresses this vertex's
/// outputs.
pub trait GraphProcessor: Send + Sync {
    /// Run the computation; `0` means success.
    fn process(&self, run: &VertexRun<'_>) -> i32;
}

impl<F> GraphProcessor for F
where
    F: Fn(&VertexRun<'_>) -> i32 + Send + Sync,
{
    fn process(&self, run: &VertexRun<'_>) -> i32 {
        self(run)
    }
}

/// A computation node: consumer of its dependency edges, producer of its
/// emitted data slots.
///
/// Readiness is tracked by a waiting counter initialized to the number of
/// essential edges plus one guard token held by the activator, the same
/// last-decrementer-wins idiom the edges use; the vertex becomes runnable
/// when the counter reaches zero.
#[derive(Debug)]
#[must_use]
pub struct GraphVertex {
    name: String,
    index: VertexIndex,
    dependencies: Vec<GraphDependency>,
    emits: Vec<DataIndex>,
    #[debug(skip)]
    processor: Box<dyn GraphProcessor>,
    essential_num: i64,
    waiting_num: AtomicI64,
    activated: AtomicBool,
    closure: Closure,
}

impl GraphVertex {
    pub(crate) fn new(
        name: String,
        index: VertexIndex,
        dependencies: Vec<GraphDependency>,
        emits: Vec<DataIndex>,
        processor: Box<dyn GraphProcessor>,
    ) -> Self {
        let essential_num = dependencies
            .iter()
            .filter(|dependency| dependency.is_essential())
            .count() as i64;
        Self {
            name,
            index,
            dependencies,
            emits,
            processor,
            essential_num,
            waiting_num: AtomicI64::new(essential_num + 1),
            activated: AtomicBool::new(false),
            closure: Closure::new(),
        }
    }

    /// Name given at build time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The completion handle of the current execution.
    #[must_use]
    pub fn closure(&self) -> &Closure {
        &self.closure
    }

    /// Incoming edges, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[GraphDependency] {
        &self.dependencies
    }

    /// One incoming edge by declaration index.
    ///
    /// # Panics
    /// When `index` is out of range.
    #[must_use]
    pub fn dependency(&self, index: usize) -> &GraphDependency {
        &self.dependencies[index]
    }

    pub(crate) fn emits(&self) -> &[DataIndex] {
        &self.emits
    }

    pub(crate) fn reset(&mut self, closure: &Closure) {
        self.waiting_num
            .store(self.essential_num + 1, Ordering::Relaxed);
        self.activated.store(false, Ordering::Relaxed);
        self.closure = closure.clone();
        for dependency in &mut self.dependencies {
            dependency.reset();
        }
    }

    /// Activate the vertex, at most once per execution: activate every
    /// edge, count the ones that were already resolved, and consume the
    /// activator's guard token. Pushes the vertex onto `runnable` when
    /// everything essential was already in place.
    ///
    /// Returns `0` normally and `-1` on a fatal reservation conflict, in
    /// which case the closure has been finished.
    pub fn activate(&self, graph: &Graph, activating: &DataStack, runnable: &VertexStack) -> i32 {
        if self.activated.swap(true, Ordering::AcqRel) {
            return 0;
        }
        // The guard token keeps the counter positive until this loop is
        // done, so a racing completion cannot make the vertex runnable
        // while its edges are still being activated.
        let mut resolved = 1;
        for dependency in &self.dependencies {
            let code = dependency.activate(graph, activating);
            if code < 0 {
                self.closure.finish(code);
                return code;
            }
            if code == 1 && dependency.is_essential() {
                resolved += 1;
            }
        }
        if self.waiting_num.fetch_sub(resolved, Ordering::AcqRel) == resolved {
            runnable.push(self.index);
        }
        0
    }

    /// Readiness report from one incoming edge. Returns true exactly once
    /// per execution, when the last essential edge reports in; the caller
    /// then owns scheduling the vertex.
    pub fn ready(&self, dependency: &GraphDependency) -> bool {
        if !dependency.is_essential() {
            return false;
        }
        self.waiting_num.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn run_process(&self, graph: &Graph) -> i32 {
        let run = VertexRun {
            graph,
            vertex: self,
        };
        self.processor.process(&run)
    }
}

/// Execution-time handle a [`GraphProcessor`] works through: typed reads of
/// the vertex's own dependencies and typed writes of its own emits. It
/// deliberately exposes nothing else of the graph, so a processor cannot
/// reach data it never declared.
pub struct VertexRun<'a> {
    graph: &'a Graph,
    vertex: &'a GraphVertex,
}

impl VertexRun<'_> {
    /// The vertex being run.
    #[must_use]
    pub fn vertex(&self) -> &GraphVertex {
        self.vertex
    }

    /// One incoming edge by declaration index.
    ///
    /// # Panics
    /// When `index` is out of range.
    #[must_use]
    pub fn dependency(&self, index: usize) -> &GraphDependency {
        self.vertex.dependency(index)
    }

    /// Typed shared view of dependency `index`'s target value.
    #[must_use]
    pub fn value<T: 'static>(&self, index: usize) -> Option<&T> {
        self.vertex.dependency(index).value(self.graph)
    }

    /// Copy of dependency `index`'s target value, defaulted when
    /// unavailable.
    #[must_use]
    pub fn as_scalar<T: Copy + Default + 'static>(&self, index: usize) -> T {
        self.vertex.dependency(index).as_scalar(self.graph)
    }

    /// Exclusive view of dependency `index`'s target value; requires the
    /// edge to have been declared mutable.
    #[must_use]
    pub fn mutable_value<T: 'static>(&self, index: usize) -> Option<MutableValue<'_, T>> {
        self.vertex.dependency(index).mutable_value(self.graph)
    }

    /// Write emit `index` of this vertex. The slot becomes visible to
    /// consumers only after the processor returns success.
    ///
    /// # Errors
    /// On a declared-type mismatch or a second write in one execution.
    ///
    /// # Panics
    /// When `index` is out of range.
    pub fn emit<T: Send + Sync + 'static>(&self, index: usize, value: T) -> Result<(), GraphError> {
        let data = self.graph.data_at(self.vertex.emits[index]);
        data.write_value(value)
    }
}
