#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    /// `parking_lot`-flavored facade over `loom::sync::Mutex`.
    pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
            self.0.lock().expect("sync::Mutex::lock")
        }
    }

    /// An `UnsafeCell` wrapper that is `Sync` when `T: Sync`, with the
    /// closure-style access API loom requires for tracking.
    pub(crate) struct SyncUnsafeCell<T>(loom::cell::UnsafeCell<T>);

    unsafe impl<T: Send> Send for SyncUnsafeCell<T> {}
    unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

    impl<T> SyncUnsafeCell<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::cell::UnsafeCell::new(value))
        }

        pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
            self.0.with(f)
        }

        pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
            self.0.with_mut(f)
        }
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    pub(crate) use parking_lot::Mutex;

    /// An `UnsafeCell` wrapper that is `Sync` when `T: Sync`.
    ///
    /// Correctness of concurrent access is ensured by the activation
    /// protocol: a data cell is written only by its producing vertex and
    /// read only after its readiness flag has been published.
    pub(crate) struct SyncUnsafeCell<T>(core::cell::UnsafeCell<T>);

    unsafe impl<T: Send> Send for SyncUnsafeCell<T> {}
    unsafe impl<T: Sync> Sync for SyncUnsafeCell<T> {}

    impl<T> SyncUnsafeCell<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(core::cell::UnsafeCell::new(value))
        }

        #[inline]
        pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
            f(self.0.get())
        }

        #[inline]
        pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
            f(self.0.get())
        }
    }
}

pub(crate) use imp::*;
