use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::graph::data::{DeclaredType, GraphData};
use crate::graph::dependency::GraphDependency;
use crate::graph::vertex::{GraphProcessor, GraphVertex};
use crate::graph::{DataIndex, Graph, GraphError, VertexIndex};

struct DependencySketch {
    target: DataIndex,
    condition: Option<(DataIndex, bool)>,
    mutable: bool,
    essential: bool,
}

struct VertexSketch {
    name: String,
    processor: Box<dyn GraphProcessor>,
    dependencies: Vec<DependencySketch>,
    emits: Vec<DataIndex>,
}

/// Assembles a [`Graph`].
///
/// Data slots are created implicitly the first time a name is referenced,
/// whether by a dependency, a condition, or an emit. The builder performs
/// no cycle detection: the resulting dependency graph is expected to be
/// acyclic.
///
/// ```
/// use anyflow::{GraphBuilder, VertexRun};
///
/// let mut builder = GraphBuilder::new();
/// {
///     let mut vertex = builder.vertex("doubler", |run: &VertexRun<'_>| {
///         let input: i64 = run.as_scalar(0);
///         run.emit(0, input * 2).is_err() as i32
///     });
///     vertex.depend("x");
///     vertex.emit::<i64>("doubled");
/// }
/// let mut graph = builder.build().unwrap();
/// graph.preset("x", 21i64).unwrap();
/// graph.run(&["doubled"]).unwrap();
/// assert_eq!(graph.data("doubled").unwrap().value::<i64>(), Some(&42));
/// ```
#[must_use]
pub struct GraphBuilder {
    vertexes: Vec<VertexSketch>,
    data: IndexMap<String, Option<DeclaredType>, FxBuildHasher>,
    errors: Vec<GraphError>,
}

impl GraphBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self {
            vertexes: Vec::new(),
            data: IndexMap::default(),
            errors: Vec::new(),
        }
    }

    /// Add a vertex running `processor` and return a handle for declaring
    /// its dependencies and emits.
    pub fn vertex(
        &mut self,
        name: &str,
        processor: impl GraphProcessor + 'static,
    ) -> VertexBuilder<'_> {
        self.vertexes.push(VertexSketch {
            name: name.to_string(),
            processor: Box::new(processor),
            dependencies: Vec::new(),
            emits: Vec::new(),
        });
        let vertex = self.vertexes.len() - 1;
        VertexBuilder {
            builder: self,
            vertex,
        }
    }

    fn intern(&mut self, name: &str) -> DataIndex {
        let entry = self.data.entry(name.to_string());
        let index = entry.index();
        entry.or_insert(None);
        index.try_into().expect("GraphBuilder::intern: [1]")
    }

    fn declare_data(&mut self, index: DataIndex, declared: DeclaredType) {
        let (name, slot) = self
            .data
            .get_index_mut(index as usize)
            .expect("GraphBuilder::declare_data: [1]");
        match slot {
            None => *slot = Some(declared),
            Some(existing) if existing.id == declared.id => {}
            Some(existing) => self.errors.push(GraphError::TypeMismatch {
                data: name.clone(),
                declared: existing.name,
                requested: declared.name,
            }),
        }
    }

    /// Materialize the graph.
    ///
    /// # Errors
    /// When conflicting types were declared for one data slot.
    pub fn build(self) -> Result<Graph, GraphError> {
        let Self {
            vertexes,
            data,
            mut errors,
        } = self;
        if !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }

        // Wire producer and consumer back-references per data slot. A
        // conditional edge subscribes to completions of both its target
        // and its condition.
        let mut producers: Vec<Vec<VertexIndex>> = vec![Vec::new(); data.len()];
        let mut consumers: Vec<Vec<(VertexIndex, usize)>> = vec![Vec::new(); data.len()];
        for (vertex_index, sketch) in vertexes.iter().enumerate() {
            let vertex_index: VertexIndex =
                vertex_index.try_into().expect("GraphBuilder::build: [1]");
            for (dependency_index, dependency) in sketch.dependencies.iter().enumerate() {
                consumers[dependency.target as usize].push((vertex_index, dependency_index));
                if let Some((condition, _)) = dependency.condition {
                    consumers[condition as usize].push((vertex_index, dependency_index));
                }
            }
            for &emit in &sketch.emits {
                producers[emit as usize].push(vertex_index);
            }
        }

        let data_index: IndexMap<String, DataIndex, FxBuildHasher> = data
            .keys()
            .enumerate()
            .map(|(index, name)| {
                (
                    name.clone(),
                    index.try_into().expect("GraphBuilder::build: [2]"),
                )
            })
            .collect();

        let data = data
            .into_iter()
            .zip(producers)
            .zip(consumers)
            .enumerate()
            .map(|(index, (((name, declared), producers), consumers))| {
                GraphData::new(
                    name,
                    index.try_into().expect("GraphBuilder::build: [3]"),
                    declared,
                    producers,
                    consumers,
                )
            })
            .collect();

        let vertexes = vertexes
            .into_iter()
            .enumerate()
            .map(|(index, sketch)| {
                let index: VertexIndex = index.try_into().expect("GraphBuilder::build: [4]");
                let dependencies = sketch
                    .dependencies
                    .into_iter()
                    .map(|dependency| {
                        GraphDependency::new(
                            index,
                            dependency.target,
                            dependency.condition,
                            dependency.mutable,
                            dependency.essential,
                        )
                    })
                    .collect();
                GraphVertex::new(
                    sketch.name,
                    index,
                    dependencies,
                    sketch.emits,
                    sketch.processor,
                )
            })
            .collect();

        Ok(Graph::from_parts(vertexes, data, data_index))
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares dependencies and emits of one vertex.
pub struct VertexBuilder<'a> {
    builder: &'a mut GraphBuilder,
    vertex: usize,
}

impl VertexBuilder<'_> {
    /// Declare a dependency on data slot `data`. Dependencies are indexed
    /// in declaration order at execution time. Edges default to essential,
    /// immutable and unconditional.
    pub fn depend(&mut self, data: &str) -> DependencyBuilder<'_> {
        let target = self.builder.intern(data);
        let sketch = &mut self.builder.vertexes[self.vertex];
        sketch.dependencies.push(DependencySketch {
            target,
            condition: None,
            mutable: false,
            essential: true,
        });
        let dependency = sketch.dependencies.len() - 1;
        DependencyBuilder {
            builder: &mut *self.builder,
            vertex: self.vertex,
            dependency,
        }
    }

    /// Declare an output data slot of type `T`. Emits are indexed in
    /// declaration order at execution time.
    pub fn emit<T: Send + Sync + 'static>(&mut self, data: &str) -> &mut Self {
        let index = self.builder.intern(data);
        self.builder.declare_data(index, DeclaredType::of::<T>());
        self.builder.vertexes[self.vertex].emits.push(index);
        self
    }
}

/// Refines one declared dependency edge.
pub struct DependencyBuilder<'a> {
    builder: &'a mut GraphBuilder,
    vertex: usize,
    dependency: usize,
}

impl DependencyBuilder<'_> {
    fn sketch(&mut self) -> &mut DependencySketch {
        &mut self.builder.vertexes[self.vertex].dependencies[self.dependency]
    }

    /// Gate the edge on boolean data slot `data` resolving to
    /// `establish_value`. The condition slot is declared as `bool`.
    pub fn condition(mut self, data: &str, establish_value: bool) -> Self {
        let condition = self.builder.intern(data);
        self.builder
            .declare_data(condition, DeclaredType::of::<bool>());
        self.sketch().condition = Some((condition, establish_value));
        self
    }

    /// Request exclusive access to the target.
    pub fn declare_mutable(mut self) -> Self {
        self.sketch().mutable = true;
        self
    }

    /// Mark whether the edge blocks the vertex from running. Defaults to
    /// essential.
    pub fn declare_essential(mut self, essential: bool) -> Self {
        self.sketch().essential = essential;
        self
    }

    /// Declare the target's type, checked against other declarations at
    /// build time.
    pub fn declare_type<T: Send + Sync + 'static>(mut self) -> Self {
        let target = self.sketch().target;
        self.builder.declare_data(target, DeclaredType::of::<T>());
        self
    }
}
