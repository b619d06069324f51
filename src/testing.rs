//! Hand-wired object graphs for unit tests
//!
//! `TestHeap` owns a collector plus any number of `TestObject`s whose edges
//! are set up explicitly. Objects are never freed before the heap is dropped;
//! deletion only marks them, so tests can inspect them afterwards.

use crate::collector::CycleCollector;
use crate::options::CollectorOptions;
use crate::participant::{Collectable, ObjectRef, TraversalCallback};
use crate::refcount::RefCount;
use crate::traced::TracedHeap;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;

/// Participant callback observed by a test
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    Traverse(String),
    Root(String),
    Unlink(String),
    Unroot(String),
    Delete(String),
}

type CallLog = Rc<RefCell<Vec<Call>>>;

pub(crate) struct TestObject {
    name: String,
    refcount: Option<RefCount>,
    edges: RefCell<Vec<ObjectRef>>,
    phantom_edges: RefCell<Vec<ObjectRef>>,
    weak_mappings: RefCell<Vec<[Option<ObjectRef>; 4]>>,
    cleanup_children: RefCell<Vec<ObjectRef>>,
    skippable: Cell<bool>,
    deleted: Cell<bool>,
    this: Cell<Option<ObjectRef>>,
    collector: Rc<CycleCollector>,
    calls: CallLog,
}

impl TestObject {
    fn record(&self, call: fn(String) -> Call) {
        self.calls.borrow_mut().push(call(self.name.clone()));
    }

    fn release_edges(&self) {
        let edges = std::mem::take(&mut *self.edges.borrow_mut());
        for child in edges {
            release(child, &self.collector);
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.get()
    }
}

fn release(object: ObjectRef, collector: &CycleCollector) {
    if let Some(refcount) = object.refcount() {
        refcount.decr(object, collector);
    }
}

unsafe impl Collectable for TestObject {
    fn refcount(&self) -> Option<&RefCount> {
        self.refcount.as_ref()
    }

    fn traverse(&self, cb: &mut dyn TraversalCallback) {
        assert!(!self.deleted.get(), "traversed deleted object {}", self.name);
        self.record(Call::Traverse);
        let edges = self.edges.borrow().clone();
        for child in edges {
            cb.note_next_edge_name("edge");
            cb.note_child(child);
        }
        let phantom = self.phantom_edges.borrow().clone();
        for child in phantom {
            cb.note_child(child);
        }
        let mappings = self.weak_mappings.borrow().clone();
        for [map, key, key_delegate, value] in mappings {
            cb.note_weak_mapping(map, key, key_delegate, value);
        }
    }

    fn root(&self) {
        self.record(Call::Root);
        if let Some(refcount) = &self.refcount {
            refcount.incr();
        }
    }

    fn unlink(&self) {
        self.record(Call::Unlink);
        self.release_edges();
        self.phantom_edges.borrow_mut().clear();
    }

    fn unroot(&self) {
        self.record(Call::Unroot);
        if let (Some(refcount), Some(this)) = (&self.refcount, self.this.get()) {
            refcount.decr(this, &self.collector);
        }
    }

    fn can_skip(&self, _removing_skippable: bool) -> bool {
        self.skippable.get()
    }

    fn can_skip_in_cc(&self) -> bool {
        self.skippable.get()
    }

    fn trace_for_cleanup(&self, tracer: &mut dyn FnMut(ObjectRef)) {
        for &child in self.cleanup_children.borrow().iter() {
            tracer(child);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    unsafe fn delete_cycle_collectable(this: NonNull<Self>) {
        let this = unsafe { this.as_ref() };
        assert!(!this.deleted.get(), "{} deleted twice", this.name);
        this.record(Call::Delete);
        this.deleted.set(true);
        this.release_edges();
    }
}

pub(crate) struct TestHeap {
    collector: Rc<CycleCollector>,
    calls: CallLog,
    objects: RefCell<Vec<Box<TestObject>>>,
}

impl TestHeap {
    pub(crate) fn new() -> Self {
        Self::with_options(CollectorOptions::DEFAULT)
    }

    pub(crate) fn with_options(options: CollectorOptions) -> Self {
        Self {
            collector: Rc::new(CycleCollector::with_options(options)),
            calls: CallLog::default(),
            objects: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn collector(&self) -> &Rc<CycleCollector> {
        &self.collector
    }

    fn alloc(&self, name: &str, refcount: Option<RefCount>) -> ObjectRef {
        let object = Box::new(TestObject {
            name: name.to_owned(),
            refcount,
            edges: RefCell::new(Vec::new()),
            phantom_edges: RefCell::new(Vec::new()),
            weak_mappings: RefCell::new(Vec::new()),
            cleanup_children: RefCell::new(Vec::new()),
            skippable: Cell::new(false),
            deleted: Cell::new(false),
            this: Cell::new(None),
            collector: self.collector.clone(),
            calls: self.calls.clone(),
        });
        // SAFETY: boxed objects live as long as the heap
        let this = unsafe { ObjectRef::new(NonNull::from(&*object)) };
        object.this.set(Some(this));
        self.objects.borrow_mut().push(object);
        this
    }

    /// A refcounted object with a zero count
    pub(crate) fn object(&self, name: &str) -> ObjectRef {
        self.alloc(name, Some(RefCount::new(0)))
    }

    /// An object owned by a traced heap
    pub(crate) fn traced_object(&self, name: &str) -> ObjectRef {
        self.alloc(name, None)
    }

    pub(crate) fn objects<const N: usize>(&self, names: [&str; N]) -> [ObjectRef; N] {
        names.map(|name| self.object(name))
    }

    pub(crate) fn get(&self, object: ObjectRef) -> &TestObject {
        // SAFETY: every ObjectRef handed out points into a box owned by self
        unsafe { object.as_ptr().cast::<TestObject>().as_ref() }
    }

    /// A strong edge, adding to the target's count
    pub(crate) fn edge(&self, from: ObjectRef, to: ObjectRef) {
        self.get(from).edges.borrow_mut().push(to);
        if let Some(refcount) = to.refcount() {
            refcount.incr();
        }
    }

    /// An edge reported by traversal but not reflected in the target's count
    pub(crate) fn phantom_edge(&self, from: ObjectRef, to: ObjectRef) {
        self.get(from).phantom_edges.borrow_mut().push(to);
    }

    /// Drop a strong edge like a mutator would
    pub(crate) fn remove_edge(&self, from: ObjectRef, to: ObjectRef) {
        let mut edges = self.get(from).edges.borrow_mut();
        if let Some(i) = edges.iter().position(|&e| e == to) {
            edges.remove(i);
            drop(edges);
            self.release(to);
        }
    }

    pub(crate) fn weak_mapping(
        &self,
        owner: ObjectRef,
        map: Option<ObjectRef>,
        key: Option<ObjectRef>,
        key_delegate: Option<ObjectRef>,
        value: Option<ObjectRef>,
    ) {
        self.get(owner)
            .weak_mappings
            .borrow_mut()
            .push([map, key, key_delegate, value]);
    }

    /// Traced objects reported by `trace_for_cleanup`
    pub(crate) fn cleanup_child(&self, owner: ObjectRef, child: ObjectRef) {
        self.get(owner).cleanup_children.borrow_mut().push(child);
    }

    pub(crate) fn set_skippable(&self, object: ObjectRef, skippable: bool) {
        self.get(object).skippable.set(skippable);
    }

    /// An external reference
    pub(crate) fn hold(&self, object: ObjectRef) {
        self.refcount(object).incr();
    }

    /// Drop an external reference, suspecting the object
    pub(crate) fn release(&self, object: ObjectRef) {
        release(object, &self.collector);
    }

    pub(crate) fn refcount(&self, object: ObjectRef) -> &RefCount {
        match self.get(object).refcount.as_ref() {
            Some(refcount) => refcount,
            None => panic!("{} has no refcount", self.get(object).name),
        }
    }

    pub(crate) fn is_deleted(&self, object: ObjectRef) -> bool {
        self.get(object).is_deleted()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Calls other than traversals
    pub(crate) fn lifecycle_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Traverse(_)))
            .collect()
    }
}

/// Traced heap whose mark bits are set by hand
#[derive(Default)]
pub(crate) struct FakeTracedHeap {
    gray: RefCell<HashSet<usize>>,
    roots: RefCell<Vec<ObjectRef>>,
    pub(crate) held: RefCell<Vec<ObjectRef>>,
    pub(crate) white: RefCell<Vec<ObjectRef>>,
    pub(crate) collections: Cell<u32>,
}

impl FakeTracedHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_gray(&self, object: ObjectRef, gray: bool) {
        let mut set = self.gray.borrow_mut();
        if gray {
            set.insert(object.addr());
        } else {
            set.remove(&object.addr());
        }
    }

    pub(crate) fn add_root(&self, object: ObjectRef) {
        self.roots.borrow_mut().push(object);
    }
}

impl TracedHeap for FakeTracedHeap {
    fn traverse_roots(&self, roots: &mut dyn TraversalCallback) {
        for &root in self.roots.borrow().iter() {
            roots.note_root(root);
        }
    }

    fn is_gray(&self, object: ObjectRef) -> bool {
        self.gray.borrow().contains(&object.addr())
    }

    fn hold_for_cleanup(&self, object: ObjectRef) {
        self.held.borrow_mut().push(object);
    }

    fn note_white_traced(&self, object: ObjectRef) {
        self.white.borrow_mut().push(object);
    }

    fn end_cycle_collection(&self, _results: &crate::CollectorResults) {
        self.collections.set(self.collections.get() + 1);
    }
}
