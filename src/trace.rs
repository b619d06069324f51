//! Trace trait for cycle-collected values
//!
//! Types stored in a [`Cc`] implement [`Trace`] to report the `Cc` pointers
//! they own. The collector uses those reports as the outgoing edges of the
//! owning object when it builds its graph.

use crate::cc::Cc;
use crate::participant::{ObjectRef, TraversalCallback};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashSet, VecDeque},
    convert::Infallible,
};

/// Reports edges of the value being traced
pub struct Tracer<'a> {
    cb: &'a mut dyn TraversalCallback,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(cb: &'a mut dyn TraversalCallback) -> Self {
        Self { cb }
    }

    /// Report a `Cc` owned by the traced value
    pub fn mark<T: Trace + 'static>(&mut self, cc: &Cc<T>) {
        self.cb.note_child(Cc::object_ref(cc));
    }

    /// Report an owned object that is not a `Cc`
    ///
    /// # Safety
    ///
    /// The value being traced must hold a strong reference to `object` that
    /// is accounted for in `object`'s reference count.
    pub unsafe fn mark_object(&mut self, object: ObjectRef) {
        self.cb.note_child(object);
    }

    /// Name the next reported edge in graph dumps
    pub fn edge_name(&mut self, name: &str) {
        if self.cb.want_debug_info() {
            self.cb.note_next_edge_name(name);
        }
    }
}

/// Trait for types that can live inside a [`Cc`]
///
/// # Safety
///
/// Implementations must report every `Cc` the value owns, each exactly once
/// per strong reference held. Reporting a pointer that is not owned leads to
/// live objects being unlinked.
///
/// # Example
///
/// ```
/// use recycle::{Cc, Trace, Tracer};
/// use std::cell::RefCell;
///
/// struct Node {
///     value: i32,
///     next: RefCell<Option<Cc<Node>>>,
/// }
///
/// unsafe impl Trace for Node {
///     fn trace(&self, tracer: &mut Tracer<'_>) {
///         self.next.trace(tracer);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// The type can never own a `Cc`, so it can never be part of a cycle
    const NO_TRACE: bool = false;

    /// Report all `Cc` pointers in this value
    fn trace(&self, tracer: &mut Tracer<'_>);
}

macro_rules! impl_no_trace {
    ($(impl$([$($tt:tt)*])? for $ty:ty);* $(;)?) => {
        $(
            unsafe impl$(<$($tt)*>)? Trace for $ty {
                const NO_TRACE: bool = true;
                fn trace(&self, _tracer: &mut Tracer<'_>) {}
            }
        )*
    };
}

impl_no_trace! {
    impl for ();
    impl for i8;
    impl for i16;
    impl for i32;
    impl for i64;
    impl for i128;
    impl for isize;
    impl for u8;
    impl for u16;
    impl for u32;
    impl for u64;
    impl for u128;
    impl for usize;
    impl for f32;
    impl for f64;
    impl for bool;
    impl for char;
    impl for String;
    impl for &str;
    impl for Infallible;
    impl[T] for std::marker::PhantomData<T>;
}

macro_rules! impl_trace_deref {
    ($(impl<$i:ident> for $ty:ty);* $(;)?) => {
        $(
            unsafe impl<$i: Trace> Trace for $ty {
                const NO_TRACE: bool = $i::NO_TRACE;
                fn trace(&self, tracer: &mut Tracer<'_>) {
                    $i::trace(self, tracer);
                }
            }
        )*
    };
}

impl_trace_deref! {
    impl<T> for Box<T>;
}

macro_rules! impl_trace_iterable {
    ($(impl<$i:ident> for $ty:ty);* $(;)?) => {
        $(
            unsafe impl<$i: Trace> Trace for $ty {
                const NO_TRACE: bool = $i::NO_TRACE;
                fn trace(&self, tracer: &mut Tracer<'_>) {
                    for item in self {
                        item.trace(tracer);
                    }
                }
            }
        )*
    };
}

impl_trace_iterable! {
    impl<T> for Vec<T>;
    impl<T> for VecDeque<T>;
    impl<T> for HashSet<T>;
    impl<T> for BTreeSet<T>;
}

macro_rules! impl_trace_map {
    ($(impl<$i:ident, $j:ident> for $ty:ty);* $(;)?) => {
        $(
            unsafe impl<$i: Trace, $j: Trace> Trace for $ty {
                const NO_TRACE: bool = $i::NO_TRACE && $j::NO_TRACE;
                fn trace(&self, tracer: &mut Tracer<'_>) {
                    for (k, v) in self.iter() {
                        k.trace(tracer);
                        v.trace(tracer);
                    }
                }
            }
        )*
    };
}

impl_trace_map! {
    impl<K, V> for std::collections::HashMap<K, V>;
    impl<K, V> for std::collections::BTreeMap<K, V>;
}

unsafe impl<T: Trace, E: Trace> Trace for Result<T, E> {
    const NO_TRACE: bool = T::NO_TRACE && E::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        match self {
            Ok(value) => value.trace(tracer),
            Err(err) => err.trace(tracer),
        }
    }
}

unsafe impl<T: Trace> Trace for Option<T> {
    const NO_TRACE: bool = T::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(value) = self {
            value.trace(tracer);
        }
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    const NO_TRACE: bool = T::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self {
            item.trace(tracer);
        }
    }
}

unsafe impl<A: Trace, B: Trace> Trace for (A, B) {
    const NO_TRACE: bool = A::NO_TRACE && B::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.0.trace(tracer);
        self.1.trace(tracer);
    }
}

/// A value borrowed mutably while the collector looks at it is skipped; its
/// owner then simply looks externally held for this collection.
unsafe impl<T: Trace> Trace for RefCell<T> {
    const NO_TRACE: bool = T::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Ok(value) = self.try_borrow() {
            value.trace(tracer);
        }
    }
}

unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    const NO_TRACE: bool = T::NO_TRACE;
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.get().trace(tracer);
    }
}
