/// Graph construction surface.
pub mod builder;
/// Per-execution completion handle.
pub mod closure;
/// Typed single-producer, many-consumer data slots.
pub mod data;
/// The edge activation state machine.
pub mod dependency;
/// Computation vertexes and their processor interface.
pub mod vertex;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use thiserror::Error;

use crate::graph::closure::Closure;
use crate::graph::data::GraphData;
use crate::graph::vertex::GraphVertex;
use crate::sync::Mutex;

/// Index of a data slot within its graph.
pub type DataIndex = u32;
/// Index of a vertex within its graph.
pub type VertexIndex = u32;

/// Errors reported by graph construction and execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// No data slot with this name exists in the graph.
    #[error("data {0:?} is not defined in this graph")]
    UnknownData(String),
    /// A data slot was declared or accessed under conflicting types.
    #[error("data {data:?} is declared as {declared} but was requested as {requested}")]
    TypeMismatch {
        /// Name of the data slot.
        data: String,
        /// Type recorded at build time.
        declared: &'static str,
        /// Type of the conflicting declaration or access.
        requested: &'static str,
    },
    /// A data slot was published a second time within one execution.
    #[error("data {0:?} was already published in this execution")]
    AlreadyPublished(String),
    /// The execution's closure finished with a nonzero code.
    #[error("execution failed with code {0}")]
    Failed(i32),
    /// A requested output did not become ready.
    #[error("data {0:?} did not become ready")]
    Unfinished(String),
}

/// Thread-safe multi-producer stack of data slots awaiting activation.
/// Element order carries no meaning.
#[must_use]
pub struct DataStack(Mutex<Vec<DataIndex>>);

impl DataStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    /// Push one data slot.
    pub fn push(&self, index: DataIndex) {
        self.0.lock().push(index);
    }

    /// Pop any pending data slot.
    pub fn pop(&self) -> Option<DataIndex> {
        self.0.lock().pop()
    }
}

impl Default for DataStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe multi-producer stack of runnable vertexes. Element order
/// carries no meaning.
#[must_use]
pub struct VertexStack(Mutex<Vec<VertexIndex>>);

impl VertexStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    /// Push one runnable vertex.
    pub fn push(&self, index: VertexIndex) {
        self.0.lock().push(index);
    }

    /// Pop any runnable vertex.
    pub fn pop(&self) -> Option<VertexIndex> {
        self.0.lock().pop()
    }
}

impl Default for VertexStack {
    fn default() -> Self {
        Self::new()
    }
}

/// An executable dataflow graph.
///
/// Built once with [`builder::GraphBuilder`], then executed any number of
/// times. One execution is: [`reset`](Self::reset) (implicit after build),
/// optional [`preset`](Self::preset) calls to feed external inputs, and
/// one [`run`](Self::run) naming the outputs to produce. Activation walks
/// backwards from the requested outputs and schedules only the producers
/// that are actually needed; everything skipped behind an unsatisfied
/// condition stays untouched.
#[derive(Debug)]
#[must_use]
pub struct Graph {
    vertexes: Vec<GraphVertex>,
    data: Vec<GraphData>,
    data_index: IndexMap<String, DataIndex, FxBuildHasher>,
    closure: Closure,
}

impl Graph {
    pub(crate) fn from_parts(
        vertexes: Vec<GraphVertex>,
        data: Vec<GraphData>,
        data_index: IndexMap<String, DataIndex, FxBuildHasher>,
    ) -> Self {
        let mut graph = Self {
            vertexes,
            data,
            data_index,
            closure: Closure::new(),
        };
        graph.reset();
        graph
    }

    /// Look up a data slot by name.
    #[must_use]
    pub fn data(&self, name: &str) -> Option<&GraphData> {
        let &index = self.data_index.get(name)?;
        Some(self.data_at(index))
    }

    /// Look up a vertex by name (the first one, if names repeat).
    #[must_use]
    pub fn vertex(&self, name: &str) -> Option<&GraphVertex> {
        self.vertexes.iter().find(|vertex| vertex.name() == name)
    }

    /// The completion handle of the current execution.
    #[must_use]
    pub fn closure(&self) -> &Closure {
        &self.closure
    }

    pub(crate) fn data_at(&self, index: DataIndex) -> &GraphData {
        &self.data[index as usize]
    }

    pub(crate) fn vertex_at(&self, index: VertexIndex) -> &GraphVertex {
        &self.vertexes[index as usize]
    }

    fn index_of(&self, name: &str) -> Result<DataIndex, GraphError> {
        self.data_index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownData(name.to_string()))
    }

    /// Open a fresh execution epoch: clear every per-execution flag,
    /// counter and value, and hand out a new [`Closure`].
    pub fn reset(&mut self) {
        self.closure = Closure::new();
        let closure = self.closure.clone();
        for vertex in &mut self.vertexes {
            vertex.reset(&closure);
        }
        for data in &mut self.data {
            data.reset();
        }
    }

    /// Feed an external input: make data slot `name` ready with `value`
    /// before activation. Consumers of a preset slot observe it as already
    /// resolved, and its (absent) producers are never scheduled.
    ///
    /// # Errors
    /// On unknown names, declared-type mismatches, or double publication.
    pub fn preset<T: Send + Sync + 'static>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<(), GraphError> {
        let index = self.index_of(name)?;
        let runnable = VertexStack::new();
        let this = &*self;
        this.data_at(index).publish(this, &runnable, value)?;
        // Completions ahead of activation can never make a vertex
        // runnable; every affected edge counter stays negative.
        debug_assert!(runnable.pop().is_none(), "Graph::preset: [1]");
        Ok(())
    }

    /// Activate everything required to produce `outputs`, pushing vertexes
    /// that are already runnable onto `runnable`. Part of [`run`](Self::run);
    /// exposed for drivers that schedule execution themselves.
    ///
    /// # Errors
    /// On unknown output names, or when activation hits a reservation
    /// conflict (the closure is then finished with the same code).
    pub fn activate(&self, outputs: &[&str], runnable: &VertexStack) -> Result<(), GraphError> {
        let activating = DataStack::new();
        for name in outputs {
            let index = self.index_of(name)?;
            self.data_at(index).trigger(&activating);
        }
        let code = self.drain_activation(&activating, runnable);
        if code != 0 {
            return Err(GraphError::Failed(code));
        }
        Ok(())
    }

    /// Drain the activation frontier, activating producers of every data
    /// slot pushed onto it. Returns the first nonzero vertex activation
    /// code.
    pub(crate) fn drain_activation(&self, activating: &DataStack, runnable: &VertexStack) -> i32 {
        while let Some(index) = activating.pop() {
            for &producer in self.data_at(index).producers() {
                let code = self
                    .vertex_at(producer)
                    .activate(self, activating, runnable);
                if code != 0 {
                    return code;
                }
            }
        }
        0
    }

    /// Execute the graph until the named outputs are ready.
    ///
    /// Activation runs on the calling thread; runnable vertexes execute on
    /// the rayon pool, and every completion cascade schedules whatever it
    /// unblocked. Returns once the graph is quiescent. Call
    /// [`reset`](Self::reset) (plus any [`preset`](Self::preset)s) before
    /// re-running.
    ///
    /// # Errors
    /// On unknown output names, when any vertex finishes the closure with
    /// a nonzero code, or when an output never became ready.
    #[cfg(not(feature = "loom"))]
    pub fn run(&mut self, outputs: &[&str]) -> Result<(), GraphError> {
        let this = &*self;
        let runnable = VertexStack::new();
        this.activate(outputs, &runnable)?;
        let runnable = &runnable;
        rayon::scope(|scope| {
            while let Some(index) = runnable.pop() {
                scope.spawn(move |scope| execute_vertex(this, index, runnable, scope));
            }
        });
        if let Some(code) = this.closure.finished() {
            if code != 0 {
                return Err(GraphError::Failed(code));
            }
        }
        for name in outputs {
            let index = this.index_of(name)?;
            if !this.data_at(index).ready() {
                this.closure.finish(-1);
                return Err(GraphError::Unfinished((*name).to_string()));
            }
        }
        this.closure.finish(0);
        Ok(())
    }
}

/// Run one vertex and cascade: release its outputs, then spawn whatever
/// those completions made runnable.
#[cfg(not(feature = "loom"))]
fn execute_vertex<'s>(
    graph: &'s Graph,
    index: VertexIndex,
    runnable: &'s VertexStack,
    scope: &rayon::Scope<'s>,
) {
    let vertex = graph.vertex_at(index);
    // Short-circuit the rest of the graph after a fatal code.
    if vertex.closure().finished().is_some() {
        return;
    }
    let code = vertex.run_process(graph);
    if code != 0 {
        crate::anyflow_log!(
            Warning,
            "vertex {} failed with code {}",
            vertex.name(),
            code
        );
        vertex.closure().finish(code);
        return;
    }
    for &emit in vertex.emits() {
        if !graph.data_at(emit).release(graph, runnable) {
            crate::anyflow_log!(
                Warning,
                "data {} produced twice in one execution",
                graph.data_at(emit).name()
            );
        }
    }
    while let Some(next) = runnable.pop() {
        scope.spawn(move |scope| execute_vertex(graph, next, runnable, scope));
    }
}
