use core::any::{Any, TypeId};
use core::ops::{Deref, DerefMut};

use derive_more::Debug;

use crate::graph::{DataIndex, DataStack, Graph, GraphError, VertexIndex, VertexStack};
use crate::sync::{AtomicBool, AtomicI64, Ordering, SyncUnsafeCell};

/// Reservation states of `depend_state`. Positive values count immutable
/// grants.
const RESERVATION_FREE: i64 = 0;
const RESERVATION_MUTABLE: i64 = -1;

/// Type assigned to a data slot at build time, checked on access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeclaredType {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl DeclaredType {
    pub(crate) fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }
}

type ValueCell = SyncUnsafeCell<Option<Box<dyn Any + Send + Sync>>>;

/// A single logical output slot of a producer vertex.
///
/// One vertex writes it per execution (normally one producer is wired;
/// merge slots may have several, of which one is expected to fire), any
/// number of consumer edges read it. Readiness is monotonic within an
/// execution: once `ready` is published the cell is no longer written and
/// the reservation state is frozen. A ready slot may still be empty when
/// its producer chose to publish nothing.
#[derive(Debug)]
#[must_use]
pub struct GraphData {
    name: String,
    index: DataIndex,
    declared: Option<DeclaredType>,
    producers: Vec<VertexIndex>,
    /// Consumer edges as (vertex index, dependency index) pairs.
    consumers: Vec<(VertexIndex, usize)>,
    #[debug(skip)]
    cell: ValueCell,
    /// Guards the cell against a second writer within one execution.
    writing: AtomicBool,
    has_value: AtomicBool,
    ready: AtomicBool,
    activated: AtomicBool,
    /// Tracks a live mutable borrow handed out by `value_mut`.
    borrowed: AtomicBool,
    depend_state: AtomicI64,
}

impl GraphData {
    pub(crate) fn new(
        name: String,
        index: DataIndex,
        declared: Option<DeclaredType>,
        producers: Vec<VertexIndex>,
        consumers: Vec<(VertexIndex, usize)>,
    ) -> Self {
        Self {
            name,
            index,
            declared,
            producers,
            consumers,
            cell: SyncUnsafeCell::new(None),
            writing: AtomicBool::new(false),
            has_value: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            activated: AtomicBool::new(false),
            borrowed: AtomicBool::new(false),
            depend_state: AtomicI64::new(RESERVATION_FREE),
        }
    }

    /// Name the slot was created under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the producing side of this slot has finished.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether no value has been written. Meaningful once `ready` holds:
    /// it then distinguishes "published nothing" from a real value.
    #[must_use]
    pub fn empty(&self) -> bool {
        !self.has_value.load(Ordering::Acquire)
    }

    /// Vertexes wired to produce this slot.
    #[must_use]
    pub fn producers(&self) -> &[VertexIndex] {
        &self.producers
    }

    pub(crate) fn reset(&mut self) {
        self.cell.with_mut(|cell| {
            // SAFETY: `&mut self` excludes every reader and writer.
            unsafe { *cell = None };
        });
        self.writing.store(false, Ordering::Relaxed);
        self.has_value.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
        self.activated.store(false, Ordering::Relaxed);
        self.borrowed.store(false, Ordering::Relaxed);
        self.depend_state
            .store(RESERVATION_FREE, Ordering::Relaxed);
    }

    /// Grant shared read access unless a mutable reservation exists.
    /// Any number of immutable grants may coexist.
    pub fn acquire_immutable_depend(&self) -> bool {
        let mut state = self.depend_state.load(Ordering::Acquire);
        loop {
            if state == RESERVATION_MUTABLE {
                return false;
            }
            match self.depend_state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => state = current,
            }
        }
    }

    /// Grant exclusive write access; succeeds only with no other grant.
    pub fn acquire_mutable_depend(&self) -> bool {
        self.depend_state
            .compare_exchange(
                RESERVATION_FREE,
                RESERVATION_MUTABLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record that this slot is needed and push it onto the activation
    /// frontier, at most once per execution.
    pub fn trigger(&self, activating: &DataStack) {
        if !self.activated.swap(true, Ordering::AcqRel) {
            activating.push(self.index);
        }
    }

    /// Activate this slot's producer chain immediately, pushing any vertex
    /// that becomes runnable. Used when a completion cascade discovers a
    /// producer that was skipped behind a pending condition. Returns 0 on
    /// success, a nonzero code on activation failure.
    pub fn recursive_activate(&self, graph: &Graph, runnable: &VertexStack) -> i32 {
        let activating = DataStack::new();
        self.trigger(&activating);
        graph.drain_activation(&activating, runnable)
    }

    /// Write `value` into the slot without publishing readiness.
    pub(crate) fn write_value<T: Send + Sync + 'static>(
        &self,
        value: T,
    ) -> Result<(), GraphError> {
        if let Some(declared) = &self.declared {
            if declared.id != TypeId::of::<T>() {
                return Err(GraphError::TypeMismatch {
                    data: self.name.clone(),
                    declared: declared.name,
                    requested: core::any::type_name::<T>(),
                });
            }
        }
        if self.writing.swap(true, Ordering::AcqRel) {
            return Err(GraphError::AlreadyPublished(self.name.clone()));
        }
        self.cell.with_mut(|cell| {
            // SAFETY: the `writing` flag admits a single writer per
            // execution, and readers are gated behind `ready`, which is
            // not yet published.
            unsafe { *cell = Some(Box::new(value)) };
        });
        self.has_value.store(true, Ordering::Release);
        Ok(())
    }

    /// Publish readiness and broadcast it to every consumer edge. Returns
    /// whether this call was the one that released the slot.
    pub(crate) fn release(&self, graph: &Graph, runnable: &VertexStack) -> bool {
        // A released slot never needs activation.
        self.activated.store(true, Ordering::Release);
        if self.ready.swap(true, Ordering::AcqRel) {
            return false;
        }
        for &(vertex, dependency) in &self.consumers {
            graph
                .vertex_at(vertex)
                .dependency(dependency)
                .on_ready(graph, self.index, runnable);
        }
        true
    }

    /// Make the slot ready with `value`, cascading readiness to consumers.
    ///
    /// This is how data enters a graph from outside (see
    /// [`Graph::preset`]) and how completion is driven in tests of the
    /// activation protocol.
    pub fn publish<T: Send + Sync + 'static>(
        &self,
        graph: &Graph,
        runnable: &VertexStack,
        value: T,
    ) -> Result<(), GraphError> {
        self.write_value(value)?;
        if !self.release(graph, runnable) {
            return Err(GraphError::AlreadyPublished(self.name.clone()));
        }
        Ok(())
    }

    /// Make the slot ready without a value.
    pub fn publish_empty(
        &self,
        graph: &Graph,
        runnable: &VertexStack,
    ) -> Result<(), GraphError> {
        if !self.release(graph, runnable) {
            return Err(GraphError::AlreadyPublished(self.name.clone()));
        }
        Ok(())
    }

    /// Typed shared view of the value. `None` while not ready, when empty,
    /// or when `T` is not the stored type.
    #[must_use]
    pub fn value<T: 'static>(&self) -> Option<&T> {
        if !self.ready() || self.empty() {
            return None;
        }
        self.cell.with(|cell| {
            // SAFETY: `ready` was published after the last write of this
            // execution, so the cell is no longer mutated; concurrent
            // mutable access is excluded by the reservation discipline.
            unsafe { (*cell).as_ref() }.and_then(|boxed| boxed.downcast_ref::<T>())
        })
    }

    /// Copy of the value, or `T::default()` while not ready or empty.
    #[must_use]
    pub fn scalar<T: Copy + Default + 'static>(&self) -> T {
        self.value::<T>().copied().unwrap_or_default()
    }

    /// Exclusive typed view of the value, tracked so a second live borrow
    /// is refused.
    pub(crate) fn value_mut<T: 'static>(&self) -> Option<MutableValue<'_, T>> {
        if !self.ready() || self.empty() {
            return None;
        }
        if self.borrowed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let value = self.cell.with_mut(|cell| {
            // SAFETY: the caller holds the slot's exclusive mutable
            // reservation, no shared grant coexists with it, and the
            // `borrowed` flag refuses a second overlapping borrow.
            unsafe { (*cell).as_mut() }.and_then(|boxed| boxed.downcast_mut::<T>())
        });
        match value {
            Some(value) => Some(MutableValue {
                value,
                borrowed: &self.borrowed,
            }),
            None => {
                self.borrowed.store(false, Ordering::Release);
                None
            }
        }
    }
}

/// Exclusive borrow of a data slot's value, released on drop.
#[derive(Debug)]
pub struct MutableValue<'a, T> {
    value: &'a mut T,
    borrowed: &'a AtomicBool,
}

impl<T> Deref for MutableValue<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for MutableValue<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T> Drop for MutableValue<'_, T> {
    fn drop(&mut self) {
        self.borrowed.store(false, Ordering::Release);
    }
}
