//! Cycle-collected smart pointer
//!
//! `Cc<T>` is a single-threaded reference-counted pointer whose count is a
//! [`RefCount`]. Dropping a handle never frees the value directly: the object
//! is handed to the thread's [`CycleCollector`](crate::CycleCollector), which
//! deletes it once its count is zero, or unlinks it if it turns out to be part
//! of a garbage cycle.
//!
//! Without an active [`CollectorContext`](crate::CollectorContext) a `Cc`
//! behaves like `Rc`: it is freed as soon as its count drops to zero and
//! cycles leak.

use crate::context;
use crate::participant::{Collectable, ObjectRef, TraversalCallback};
use crate::refcount::RefCount;
use crate::trace::{Trace, Tracer};
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Live,
    /// The value was dropped by the collector; only the allocation remains
    Unlinked,
}

/// Heap part of a [`Cc`]
///
/// SAFETY: repr(C) keeps `refcount` at offset 0.
#[repr(C)]
struct CcBox<T> {
    refcount: RefCount,
    state: Cell<State>,
    data: UnsafeCell<ManuallyDrop<T>>,
}

impl<T> CcBox<T> {
    /// Drop the value in place, at most once
    ///
    /// # Safety
    ///
    /// No reference to the value may be alive.
    unsafe fn drop_data(&self) {
        if self.state.replace(State::Unlinked) == State::Live {
            let data = unsafe { ManuallyDrop::take(&mut *self.data.get()) };
            drop(data);
        }
    }
}

unsafe impl<T: Trace + 'static> Collectable for CcBox<T> {
    fn refcount(&self) -> Option<&RefCount> {
        Some(&self.refcount)
    }

    fn traverse(&self, cb: &mut dyn TraversalCallback) {
        if self.state.get() == State::Live {
            let data: &T = unsafe { &*self.data.get() };
            data.trace(&mut Tracer::new(cb));
        }
    }

    fn root(&self) {
        self.refcount.incr();
    }

    fn unlink(&self) {
        // SAFETY: unlinked objects are unreachable from outside the garbage
        unsafe { self.drop_data() };
    }

    fn unroot(&self) {
        release(NonNull::from(self));
    }

    fn can_skip(&self, _removing_skippable: bool) -> bool {
        T::NO_TRACE
    }

    fn can_skip_in_cc(&self) -> bool {
        T::NO_TRACE
    }

    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }

    unsafe fn delete_cycle_collectable(this: NonNull<Self>) {
        let cc_box = unsafe { Box::from_raw(this.as_ptr()) };
        unsafe { cc_box.drop_data() };
    }
}

/// Drop one reference to `ptr`
fn release<T: Trace + 'static>(ptr: NonNull<CcBox<T>>) {
    let cc_box = unsafe { ptr.as_ref() };
    let object = unsafe { ObjectRef::new(ptr) };
    let tracked = context::with_current(|collector| {
        cc_box.refcount.decr(object, collector);
    });
    if tracked.is_none()
        && cc_box.refcount.decr_untracked() == 0
        && !cc_box.refcount.is_in_purple_buffer()
    {
        // SAFETY: count is zero and no collector knows the object
        unsafe { CcBox::delete_cycle_collectable(ptr) };
    }
}

/// Cycle-collected pointer
///
/// Implements `Deref` for transparent access to the value.
///
/// # Panics
///
/// Dereferencing a `Cc` whose value was already unlinked by the collector
/// panics. That can only happen from the `Drop` impl of another member of the
/// same garbage cycle.
pub struct Cc<T: Trace + 'static> {
    ptr: NonNull<CcBox<T>>,
    _marker: PhantomData<CcBox<T>>,
}

impl<T: Trace + 'static> Cc<T> {
    pub fn new(value: T) -> Self {
        let cc_box = Box::new(CcBox {
            refcount: RefCount::new(1),
            state: Cell::new(State::Live),
            data: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        Self {
            ptr: NonNull::from(Box::leak(cc_box)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> &CcBox<T> {
        unsafe { self.ptr.as_ref() }
    }

    /// The collector's view of this object
    pub fn object_ref(this: &Self) -> ObjectRef {
        unsafe { ObjectRef::new(this.ptr) }
    }

    pub fn strong_count(this: &Self) -> usize {
        this.inner().refcount.get()
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Whether the collector already dropped the value
    pub fn is_unlinked(this: &Self) -> bool {
        this.inner().state.get() == State::Unlinked
    }

    /// The value, or `None` once unlinked
    pub fn try_get(this: &Self) -> Option<&T> {
        let inner = this.inner();
        match inner.state.get() {
            State::Live => Some(unsafe { &*inner.data.get() }),
            State::Unlinked => None,
        }
    }
}

impl<T: Trace + 'static> Deref for Cc<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match Cc::try_get(self) {
            Some(value) => value,
            None => panic!("dereferenced a Cc<{}> after it was unlinked", std::any::type_name::<T>()),
        }
    }
}

impl<T: Trace + 'static> Clone for Cc<T> {
    fn clone(&self) -> Self {
        self.inner().refcount.incr();
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Trace + 'static> Drop for Cc<T> {
    fn drop(&mut self) {
        release(self.ptr);
    }
}

unsafe impl<T: Trace + 'static> Trace for Cc<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.mark(self);
    }
}

impl<T: Trace + fmt::Debug + 'static> fmt::Debug for Cc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Cc::try_get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("<unlinked>"),
        }
    }
}

impl<T: Trace + fmt::Display + 'static> fmt::Display for Cc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
