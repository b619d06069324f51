//! Participant capabilities for collectable objects
//!
//! Every object the collector can see is described by an [`ObjectRef`]: an
//! opaque address plus a static [`Participant`] vtable for its type. Object
//! types implement the safe-to-read [`Collectable`] trait; the erased vtable
//! for a `Collectable` type is generated automatically, in the same way a
//! `GcVTable` is generated per traced type.
//!
//! Traced-heap objects (owned by an external tracing collector) are
//! collectables without a [`RefCount`]; a traced heap may also supply a single
//! hand-written [`Participant`] for all of its object kinds and build
//! references with [`ObjectRef::from_parts`].

use crate::refcount::RefCount;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Receives the outgoing edges of an object during traversal
///
/// Implemented by the graph builder and by the collector's internal child
/// probes. Participants call it from [`Collectable::traverse`].
pub trait TraversalCallback {
    /// Report a strong outgoing reference
    fn note_child(&mut self, child: ObjectRef);

    /// Report a weak-map entry
    ///
    /// `None` members mean "known live", e.g. already marked by the traced heap.
    fn note_weak_mapping(
        &mut self,
        map: Option<ObjectRef>,
        key: Option<ObjectRef>,
        key_delegate: Option<ObjectRef>,
        value: Option<ObjectRef>,
    );

    /// Report a root object; only meaningful from [`TracedHeap::traverse_roots`]
    ///
    /// [`TracedHeap::traverse_roots`]: crate::TracedHeap::traverse_roots
    fn note_root(&mut self, root: ObjectRef) {
        let _ = root;
    }

    /// Name the edge reported by the next `note_child` call (diagnostics only)
    fn note_next_edge_name(&mut self, name: &str) {
        let _ = name;
    }

    /// Whether edge names are wanted; lets participants skip formatting them
    fn want_debug_info(&self) -> bool {
        false
    }
}

/// Per-type collector capabilities
///
/// # Safety
///
/// Implementations must uphold the graph protocol:
/// - `traverse` reports every strong reference the object holds (through
///   `note_child`) and must not change any reference count while doing so.
///   Under-reporting makes the object look externally held and is safe;
///   over-reporting leads to live objects being unlinked.
/// - `refcount` returns the same cell for the whole lifetime of the object and
///   returns `None` only for objects owned by the traced heap.
/// - an object may only be handed to the collector (suspected) if it satisfies
///   the two rules above ("purple safety").
pub unsafe trait Collectable: 'static {
    /// The object's reference count, `None` for traced-heap objects
    fn refcount(&self) -> Option<&RefCount>;

    /// Report outgoing references to `cb`
    fn traverse(&self, cb: &mut dyn TraversalCallback);

    /// Pin the object so unlinking other garbage cannot destroy it
    fn root(&self);

    /// Release all outgoing strong references
    fn unlink(&self);

    /// Undo `root`
    fn unroot(&self);

    /// Cheap hint that the object cannot be part of a garbage cycle right now
    fn can_skip(&self, removing_skippable: bool) -> bool {
        let _ = removing_skippable;
        false
    }

    /// Like `can_skip`, asked while seeding a collection graph
    fn can_skip_in_cc(&self) -> bool {
        false
    }

    /// Report traced-heap objects the object holds, right before it is deleted
    fn trace_for_cleanup(&self, tracer: &mut dyn FnMut(ObjectRef)) {
        let _ = tracer;
    }

    /// Human readable type name used in graph dumps
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Destroy the object
    ///
    /// # Safety
    ///
    /// `this` must point to a live object whose reference count has dropped to
    /// zero. It is dangling once this returns.
    unsafe fn delete_cycle_collectable(this: NonNull<Self>)
    where
        Self: Sized;
}

/// Type-erased capability table
///
/// # Safety
///
/// Every method receives the address an [`ObjectRef`] was built with and must
/// treat it as an object of the type the table was made for. The same
/// protocol rules as for [`Collectable`] apply.
pub unsafe trait Participant {
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn traverse(&self, obj: NonNull<()>, cb: &mut dyn TraversalCallback);
    /// # Safety
    /// `obj` must be live and of this participant's type; the returned cell
    /// must not outlive it.
    unsafe fn refcount<'a>(&self, obj: NonNull<()>) -> Option<&'a RefCount>;
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn root(&self, obj: NonNull<()>);
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn unlink(&self, obj: NonNull<()>);
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn unroot(&self, obj: NonNull<()>);
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn can_skip(&self, obj: NonNull<()>, removing_skippable: bool) -> bool;
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn can_skip_in_cc(&self, obj: NonNull<()>) -> bool;
    /// # Safety
    /// `obj` must be live and of this participant's type.
    unsafe fn trace_for_cleanup(&self, obj: NonNull<()>, tracer: &mut dyn FnMut(ObjectRef));
    /// # Safety
    /// `obj` must be live and of this participant's type; the name must not
    /// outlive it.
    unsafe fn name<'a>(&self, obj: NonNull<()>) -> &'a str;
    /// # Safety
    /// `obj` must be live with a zero reference count. Dangling afterwards.
    unsafe fn delete_cycle_collectable(&self, obj: NonNull<()>);
}

struct Erased<T>(PhantomData<fn() -> T>);

impl<T: Collectable> Erased<T> {
    const VTABLE: &'static dyn Participant = &Erased::<T>(PhantomData);

    #[inline]
    unsafe fn this<'a>(obj: NonNull<()>) -> &'a T {
        unsafe { obj.cast::<T>().as_ref() }
    }
}

unsafe impl<T: Collectable> Participant for Erased<T> {
    unsafe fn traverse(&self, obj: NonNull<()>, cb: &mut dyn TraversalCallback) {
        unsafe { Self::this(obj) }.traverse(cb)
    }

    unsafe fn refcount<'a>(&self, obj: NonNull<()>) -> Option<&'a RefCount> {
        unsafe { Self::this::<'a>(obj) }.refcount()
    }

    unsafe fn root(&self, obj: NonNull<()>) {
        unsafe { Self::this(obj) }.root()
    }

    unsafe fn unlink(&self, obj: NonNull<()>) {
        unsafe { Self::this(obj) }.unlink()
    }

    unsafe fn unroot(&self, obj: NonNull<()>) {
        unsafe { Self::this(obj) }.unroot()
    }

    unsafe fn can_skip(&self, obj: NonNull<()>, removing_skippable: bool) -> bool {
        unsafe { Self::this(obj) }.can_skip(removing_skippable)
    }

    unsafe fn can_skip_in_cc(&self, obj: NonNull<()>) -> bool {
        unsafe { Self::this(obj) }.can_skip_in_cc()
    }

    unsafe fn trace_for_cleanup(&self, obj: NonNull<()>, tracer: &mut dyn FnMut(ObjectRef)) {
        unsafe { Self::this(obj) }.trace_for_cleanup(tracer)
    }

    unsafe fn name<'a>(&self, obj: NonNull<()>) -> &'a str {
        unsafe { Self::this::<'a>(obj) }.name()
    }

    unsafe fn delete_cycle_collectable(&self, obj: NonNull<()>) {
        unsafe { T::delete_cycle_collectable(obj.cast()) }
    }
}

/// Identity of a collectable object plus its participant
///
/// Equality and hashing use the address only.
#[derive(Clone, Copy)]
pub struct ObjectRef {
    ptr: NonNull<()>,
    participant: &'static dyn Participant,
}

impl ObjectRef {
    /// Build a reference to a `Collectable`
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid until the object is deleted through
    /// `delete_cycle_collectable` (refcounted objects) or until the traced heap
    /// stops reporting it (traced objects).
    #[inline]
    pub unsafe fn new<T: Collectable>(ptr: NonNull<T>) -> Self {
        Self {
            ptr: ptr.cast(),
            participant: Erased::<T>::VTABLE,
        }
    }

    /// Build a reference from an address and a hand-written participant
    ///
    /// # Safety
    ///
    /// As for [`ObjectRef::new`]; additionally `participant` must describe the
    /// object at `ptr`.
    #[inline]
    pub unsafe fn from_parts(ptr: NonNull<()>, participant: &'static dyn Participant) -> Self {
        Self { ptr, participant }
    }

    /// The object's address, its identity
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<()> {
        self.ptr
    }

    // The wrappers below rely on the contract of `new`/`from_parts`: the
    // collector only calls them on objects that have not been deleted.

    pub(crate) fn traverse(&self, cb: &mut dyn TraversalCallback) {
        unsafe { self.participant.traverse(self.ptr, cb) }
    }

    pub(crate) fn refcount<'a>(&self) -> Option<&'a RefCount> {
        unsafe { self.participant.refcount(self.ptr) }
    }

    pub(crate) fn is_traced(&self) -> bool {
        self.refcount().is_none()
    }

    pub(crate) fn root(&self) {
        unsafe { self.participant.root(self.ptr) }
    }

    pub(crate) fn unlink(&self) {
        unsafe { self.participant.unlink(self.ptr) }
    }

    pub(crate) fn unroot(&self) {
        unsafe { self.participant.unroot(self.ptr) }
    }

    pub(crate) fn can_skip(&self, removing_skippable: bool) -> bool {
        unsafe { self.participant.can_skip(self.ptr, removing_skippable) }
    }

    pub(crate) fn can_skip_in_cc(&self) -> bool {
        unsafe { self.participant.can_skip_in_cc(self.ptr) }
    }

    pub(crate) fn trace_for_cleanup(&self, tracer: &mut dyn FnMut(ObjectRef)) {
        unsafe { self.participant.trace_for_cleanup(self.ptr, tracer) }
    }

    pub(crate) fn name<'a>(&self) -> &'a str {
        unsafe { self.participant.name(self.ptr) }
    }

    /// # Safety
    /// The object's count must be zero and nothing may use `self` afterwards.
    pub(crate) unsafe fn delete_cycle_collectable(self) {
        unsafe { self.participant.delete_cycle_collectable(self.ptr) }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.addr())
    }
}

/// Callback that only records whether any child was reported
#[derive(Default)]
pub(crate) struct ChildFinder {
    pub(crate) found: bool,
}

impl TraversalCallback for ChildFinder {
    fn note_child(&mut self, _child: ObjectRef) {
        self.found = true;
    }

    fn note_weak_mapping(
        &mut self,
        _map: Option<ObjectRef>,
        _key: Option<ObjectRef>,
        _key_delegate: Option<ObjectRef>,
        _value: Option<ObjectRef>,
    ) {
    }
}
