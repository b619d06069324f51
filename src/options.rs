//! Collector configuration

use std::time::Duration;

/// Tuning knobs of a [`CycleCollector`](crate::CycleCollector)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Default time budget of an incremental slice
    pub slice_duration: Duration,
    /// Keep going past graph building within one call while fewer than this
    /// many slices have run
    pub eager_slices: u32,
    /// Never continue past graph building in a budgeted slice
    pub prefer_shorter_slices: bool,
    /// Suspected object count above which `should_collect` answers yes
    pub purple_trigger: usize,
    /// Upper bound on the full collections run by `shutdown`
    pub shutdown_collections: u32,
    /// Graph size above which graph building gives up as out of memory
    pub max_graph_nodes: usize,
}

impl CollectorOptions {
    pub const DEFAULT: Self = Self {
        slice_duration: Duration::from_millis(5),
        eager_slices: 3,
        prefer_shorter_slices: false,
        purple_trigger: 1000,
        shutdown_collections: 5,
        max_graph_nodes: usize::MAX,
    };
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}
