use crate::anyflow_log;
use crate::graph::data::MutableValue;
use crate::graph::{DataIndex, DataStack, Graph, VertexIndex, VertexStack};
use crate::sync::{AtomicBool, AtomicI64, Ordering};

/// One edge of the dependency graph: a consumer vertex reading an upstream
/// data slot, optionally gated by a boolean condition slot.
///
/// All per-execution coordination runs through the single signed counter
/// `waiting_num`. Activation adds 1 (or 2 with a condition: one unit for
/// the target, one for the condition) and branches on the post-add value;
/// each completion subtracts 1; an unsatisfied condition subtracts a second
/// time to pre-cancel the pending target unit. After activation and all
/// completions the counter rests at a terminal value:
///
/// * `-1` — the edge had resolved before activation and the condition
///   failed while the target completed anyway through another consumer.
/// * `0` — every other quiescent outcome.
///
/// Whichever call drives the counter to its terminal resting point owns
/// finalizing the edge and notifying the source vertex; the acquire-release
/// ordering on the counter makes the flag and value writes of the other
/// actors visible to it.
#[derive(Debug)]
#[must_use]
pub struct GraphDependency {
    source: VertexIndex,
    target: DataIndex,
    condition: Option<DataIndex>,
    establish_value: bool,
    mutable: bool,
    essential: bool,
    waiting_num: AtomicI64,
    // Resolved at most once per execution; ordering is carried by
    // `waiting_num` and the source vertex's own counter.
    established: AtomicBool,
    ready: AtomicBool,
}

impl GraphDependency {
    pub(crate) fn new(
        source: VertexIndex,
        target: DataIndex,
        condition: Option<(DataIndex, bool)>,
        mutable: bool,
        essential: bool,
    ) -> Self {
        let (condition, establish_value) = match condition {
            Some((condition, establish_value)) => (Some(condition), establish_value),
            None => (None, true),
        };
        Self {
            source,
            target,
            condition,
            establish_value,
            mutable,
            essential,
            waiting_num: AtomicI64::new(0),
            established: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether the consumer was granted exclusive access to the target.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Whether the source vertex may not run before this edge is ready.
    #[must_use]
    pub fn is_essential(&self) -> bool {
        self.essential
    }

    /// Whether the edge has resolved with a usable target.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Whether the condition matched its configured polarity (always true
    /// for resolved unconditional edges).
    #[must_use]
    pub fn established(&self) -> bool {
        self.established.load(Ordering::Relaxed)
    }

    /// Current value of the waiting counter. Once an execution has
    /// quiesced this is terminal and always reads -1 or 0.
    #[must_use]
    pub fn waiting_num(&self) -> i64 {
        self.waiting_num.load(Ordering::Acquire)
    }

    /// Whether the target carries no value. See [`GraphData::empty`].
    ///
    /// [`GraphData::empty`]: crate::graph::data::GraphData::empty
    #[must_use]
    pub fn empty(&self, graph: &Graph) -> bool {
        graph.data_at(self.target).empty()
    }

    pub(crate) fn reset(&mut self) {
        self.waiting_num.store(0, Ordering::Relaxed);
        self.established.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
    }

    /// Evaluate the condition, latching `established` on success. An
    /// absent condition is always established.
    fn check_established(&self, graph: &Graph) -> bool {
        match self.condition {
            None => {
                self.established.store(true, Ordering::Relaxed);
                true
            }
            Some(condition) => {
                if graph.data_at(condition).scalar::<bool>() == self.establish_value {
                    self.established.store(true, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn acquire_depend(&self, graph: &Graph) -> bool {
        let target = graph.data_at(self.target);
        if self.mutable {
            target.acquire_mutable_depend()
        } else {
            target.acquire_immutable_depend()
        }
    }

    /// Activate the edge, exactly once per execution.
    ///
    /// Returns `1` when the edge was already resolved at activation time
    /// (the caller must count it against its own waiting counter, since no
    /// completion callback will arrive), `0` when completions are still
    /// pending, and `-1` on a fatal reservation conflict.
    #[allow(clippy::too_many_lines)]
    pub fn activate(&self, graph: &Graph, activating: &DataStack) -> i32 {
        let delta = if self.condition.is_none() { 1 } else { 2 };
        let waiting_num = self.waiting_num.fetch_add(delta, Ordering::AcqRel) + delta;
        debug_assert!(
            waiting_num <= 2,
            "dependency activated more than once in one execution"
        );
        match waiting_num {
            // Resolved before activation with an unsatisfied condition;
            // the target completed anyway through another consumer.
            -1 => 1,
            // Resolved before activation; the condition may hold.
            0 => {
                if self.check_established(graph) {
                    if !self.acquire_depend(graph) {
                        anyflow_log!(
                            Warning,
                            "dependency of vertex {} on data {} refused, another \
                             consumer already holds a conflicting reservation",
                            graph.vertex_at(self.source).name(),
                            graph.data_at(self.target).name()
                        );
                        return -1;
                    }
                    self.ready
                        .store(graph.data_at(self.target).ready(), Ordering::Relaxed);
                }
                1
            }
            // The activation landed before any completion.
            1 => {
                match self.condition {
                    // Unconditional: reserve and activate the target.
                    None => {
                        self.established.store(true, Ordering::Relaxed);
                        if !self.acquire_depend(graph) {
                            anyflow_log!(
                                Warning,
                                "dependency of vertex {} on data {} refused, another \
                                 consumer already holds a conflicting reservation",
                                graph.vertex_at(self.source).name(),
                                graph.data_at(self.target).name()
                            );
                            return -1;
                        }
                        graph.data_at(self.target).trigger(activating);
                    }
                    Some(condition) => {
                        let condition = graph.data_at(condition);
                        if !condition.ready() {
                            // Condition not resolved yet: activate it and
                            // postpone the target decision.
                            condition.trigger(activating);
                        } else if self.check_established(graph) {
                            if !self.acquire_depend(graph) {
                                anyflow_log!(
                                    Warning,
                                    "dependency of vertex {} on data {} under condition \
                                     {} refused, another consumer already holds a \
                                     conflicting reservation",
                                    graph.vertex_at(self.source).name(),
                                    graph.data_at(self.target).name(),
                                    condition.name()
                                );
                                return -1;
                            }
                            graph.data_at(self.target).trigger(activating);
                        }
                        // Otherwise the condition is resolved but
                        // unsatisfied while the counter still reads 1: its
                        // second decrement is in flight and will carry the
                        // counter to the terminal value. Nothing to do.
                    }
                }
                0
            }
            // Nothing resolved yet on a conditional edge: activate the
            // condition; the target waits on its verdict.
            2 => {
                let condition = self
                    .condition
                    .expect("GraphDependency::activate: [1]");
                graph.data_at(condition).trigger(activating);
                0
            }
            _ => 0,
        }
    }

    /// Completion callback from an upstream slot (`data` is either the
    /// target or the condition). Whichever invocation drives `waiting_num`
    /// to its resting point finalizes the edge and notifies the source
    /// vertex, pushing it onto `runnable` when it became runnable.
    pub fn on_ready(&self, graph: &Graph, data: DataIndex, runnable: &VertexStack) {
        let mut waiting_num = self.waiting_num.fetch_sub(1, Ordering::AcqRel) - 1;
        if Some(data) == self.condition {
            if self.check_established(graph) {
                if waiting_num == 1 {
                    // The target sat skipped behind this condition and was
                    // never activated; reserve it and bring up the
                    // producers the activation walk left out.
                    if !self.acquire_depend(graph) {
                        anyflow_log!(
                            Warning,
                            "dependency of vertex {} on data {} refused, another \
                             consumer already holds a conflicting reservation",
                            graph.vertex_at(self.source).name(),
                            graph.data_at(self.target).name()
                        );
                        graph.vertex_at(self.source).closure().finish(-1);
                        return;
                    }
                    let code = graph
                        .data_at(self.target)
                        .recursive_activate(graph, runnable);
                    if code != 0 {
                        anyflow_log!(
                            Warning,
                            "recursive activation from data {} failed",
                            graph.data_at(self.target).name()
                        );
                        graph.vertex_at(self.source).closure().finish(code);
                        return;
                    }
                }
            } else if waiting_num != 0 {
                // Unsatisfied condition: pre-cancel the pending target
                // unit. The target can still complete through another
                // consumer, which is how the terminal value reaches -1.
                waiting_num = self.waiting_num.fetch_sub(1, Ordering::AcqRel) - 1;
            }
        }
        // The resting point. The completion-side terminal 0 and the
        // activation-side terminals {-1, 0} partition every interleaving
        // of target, condition and activator: the vertex is notified
        // exactly once, with no edge left behind.
        if waiting_num == 0 {
            if data == self.target {
                self.ready.store(self.check_established(graph), Ordering::Relaxed);
            } else {
                let target_ready = graph.data_at(self.target).ready();
                self.ready
                    .store(self.established() && target_ready, Ordering::Relaxed);
            }
            if graph.vertex_at(self.source).ready(self) {
                runnable.push(self.source);
            }
        }
    }

    /// Typed shared view of the target value. `None` while the edge is not
    /// ready, the target is empty, or `T` is not the stored type.
    #[must_use]
    pub fn value<'g, T: 'static>(&self, graph: &'g Graph) -> Option<&'g T> {
        if !self.ready() {
            return None;
        }
        graph.data_at(self.target).value::<T>()
    }

    /// Copy of the target value, or `T::default()` when unavailable.
    #[must_use]
    pub fn as_scalar<T: Copy + Default + 'static>(&self, graph: &Graph) -> T {
        if !self.ready() {
            return T::default();
        }
        graph.data_at(self.target).scalar::<T>()
    }

    /// Exclusive typed view of the target value. `None` unless the edge is
    /// ready, was declared mutable, and no other borrow is live.
    #[must_use]
    pub fn mutable_value<'g, T: 'static>(&self, graph: &'g Graph) -> Option<MutableValue<'g, T>> {
        if !self.ready() || !self.mutable {
            return None;
        }
        graph.data_at(self.target).value_mut::<T>()
    }

    /// Append the names of the vertexes that produced the target.
    ///
    /// Returns `0` when the edge is ready and producer names were appended,
    /// `1` when it is ready but the target has no producers (externally
    /// published data), and `-1` when the edge is not ready.
    pub fn activated_vertex_name(&self, graph: &Graph, vertex_names: &mut Vec<String>) -> i32 {
        if !self.ready() {
            return -1;
        }
        let producers = graph.data_at(self.target).producers();
        if producers.is_empty() {
            return 1;
        }
        for &producer in producers {
            vertex_names.push(graph.vertex_at(producer).name().to_string());
        }
        0
    }
}
