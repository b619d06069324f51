//! Thread-local collector context
//!
//! Each thread can have one active collector, installed by a
//! [`CollectorContext`] RAII guard. [`Cc`](crate::Cc) handles dropped while a
//! context is active hand their objects to that collector.

use crate::budget::SliceBudget;
use crate::cc::Cc;
use crate::collector::CycleCollector;
use crate::error::CollectorFault;
use crate::options::CollectorOptions;
use crate::trace::Trace;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

thread_local! {
    static CURRENT_COLLECTOR: RefCell<Option<Rc<CycleCollector>>> = const { RefCell::new(None) };
}

/// Run `f` with the current thread's collector, if there is one
///
/// The collector is cloned out of the thread-local first, so `f` may freely
/// re-enter this function.
pub(crate) fn with_current<R>(f: impl FnOnce(&CycleCollector) -> R) -> Option<R> {
    let collector = CURRENT_COLLECTOR
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()?;
    Some(f(&collector))
}

fn set_current_collector(
    collector: Option<Rc<CycleCollector>>,
) -> Option<Rc<CycleCollector>> {
    CURRENT_COLLECTOR
        .try_with(|current| current.replace(collector))
        .ok()
        .flatten()
}

/// RAII guard for the thread's cycle collector
///
/// While this guard is alive, `Cc` handles on this thread report to its
/// collector. Dropping the guard shuts the collector down (collecting any
/// remaining garbage cycles) and reinstates the context that was active
/// before, if any.
///
/// # Example
///
/// ```
/// use recycle::CollectorContext;
///
/// let ctx = CollectorContext::new();
/// let value = ctx.allocate(42);
/// assert_eq!(*value, 42);
/// drop(value);
/// ctx.collect().unwrap();
/// ```
pub struct CollectorContext {
    collector: Rc<CycleCollector>,
    previous: Option<Rc<CycleCollector>>,
    _non_send_or_sync: PhantomData<*const ()>,
}

impl Default for CollectorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorContext {
    /// Create a collector and make it the active one for this thread
    pub fn new() -> Self {
        Self::with_options(CollectorOptions::DEFAULT)
    }

    pub fn with_options(options: CollectorOptions) -> Self {
        let collector = Rc::new(CycleCollector::with_options(options));
        let previous = set_current_collector(Some(Rc::clone(&collector)));
        log::trace!("installed thread collector context");
        Self {
            collector,
            previous,
            _non_send_or_sync: PhantomData,
        }
    }

    /// Allocate a cycle-collected value
    pub fn allocate<T: Trace + 'static>(&self, value: T) -> Cc<T> {
        Cc::new(value)
    }

    /// Run a full collection
    pub fn collect(&self) -> Result<bool, CollectorFault> {
        self.collector.collect()
    }

    /// Run one slice with the given budget
    pub fn collect_slice(&self, budget: SliceBudget) -> Result<bool, CollectorFault> {
        self.collector.collect_slice(budget)
    }

    /// Run one slice if enough objects are suspected
    pub fn maybe_collect(&self) -> Result<bool, CollectorFault> {
        if self.collector.is_idle() && !self.collector.should_collect() {
            return Ok(false);
        }
        self.collector.collect_incremental()
    }

    pub fn collector(&self) -> &Rc<CycleCollector> {
        &self.collector
    }
}

impl Drop for CollectorContext {
    fn drop(&mut self) {
        self.collector.shutdown();
        set_current_collector(self.previous.take());
        log::trace!("removed thread collector context");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_installs_and_restores_collector() {
        assert!(with_current(|_| ()).is_none());
        let outer = CollectorContext::new();
        let outer_addr = Rc::as_ptr(outer.collector());
        assert_eq!(with_current(|c| c as *const _), Some(outer_addr));
        {
            let inner = CollectorContext::new();
            assert_eq!(with_current(|c| c as *const _), Some(Rc::as_ptr(inner.collector())));
        }
        assert_eq!(with_current(|c| c as *const _), Some(outer_addr));
        drop(outer);
        assert!(with_current(|_| ()).is_none());
    }

    #[test]
    fn maybe_collect_waits_for_trigger() {
        let ctx = CollectorContext::with_options(CollectorOptions {
            purple_trigger: 1,
            ..CollectorOptions::DEFAULT
        });
        let a = ctx.allocate(1u8);
        drop(a);
        assert_eq!(ctx.maybe_collect(), Ok(false));
        assert_eq!(ctx.collector().suspected_count(), 1);
    }
}
