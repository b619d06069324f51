//! Diagnostic listeners
//!
//! A [`CollectorListener`] attached to a collection is shown the whole graph as
//! it is built (every node, edge, weak-map entry and incremental root) and the
//! verdict once scanning is done. Listeners never influence the outcome, with
//! one exception: a listener that wants all traces disables the skip
//! optimizations so the dump is complete.
//!
//! [`RecordingListener`] keeps everything in memory and can write a textual
//! dump in the usual cycle-collector edge-log format.

use parking_lot::Mutex;
use std::io::{self, Write};

/// Observer of one collection
pub trait CollectorListener {
    /// Disable `can_skip` shortcuts and add black traced children too
    fn want_all_traces(&self) -> bool {
        false
    }

    /// Graph building is starting
    fn begin(&self) {}

    fn note_refcounted_object(&self, address: usize, ref_count: u32, name: &str) {
        let _ = (address, ref_count, name);
    }

    fn note_traced_object(&self, address: usize, marked: bool, name: &str) {
        let _ = (address, marked, name);
    }

    fn note_edge(&self, from: usize, to: usize, name: &str) {
        let _ = (from, to, name);
    }

    fn note_weak_map_entry(
        &self,
        map: Option<usize>,
        key: Option<usize>,
        key_delegate: Option<usize>,
        value: Option<usize>,
    ) {
        let _ = (map, key, key_delegate, value);
    }

    fn note_incremental_root(&self, address: usize) {
        let _ = address;
    }

    /// Scanning is done; the verdict follows
    fn begin_results(&self) {}

    /// A live node with references from outside the graph
    fn describe_root(&self, address: usize, known_edges: u32) {
        let _ = (address, known_edges);
    }

    fn describe_garbage(&self, address: usize) {
        let _ = address;
    }

    fn end(&self) {}
}

/// One recorded listener event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    RefCounted {
        address: usize,
        ref_count: u32,
        name: String,
    },
    Traced {
        address: usize,
        marked: bool,
        name: String,
    },
    Edge {
        from: usize,
        to: usize,
        name: String,
    },
    WeakMapEntry {
        map: Option<usize>,
        key: Option<usize>,
        key_delegate: Option<usize>,
        value: Option<usize>,
    },
    IncrementalRoot(usize),
    Root {
        address: usize,
        known_edges: u32,
    },
    Garbage(usize),
}

/// Everything a [`RecordingListener`] saw during one collection
#[derive(Debug, Clone, Default)]
pub struct GraphLog {
    pub graph: Vec<LogEntry>,
    pub results: Vec<LogEntry>,
    pub complete: bool,
}

impl GraphLog {
    /// Addresses reported as garbage
    pub fn garbage(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Garbage(address) => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// Addresses reported as externally held roots
    pub fn roots(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Root { address, .. } => Some(*address),
                _ => None,
            })
            .collect()
    }

    pub fn incremental_roots(&self) -> Vec<usize> {
        self.graph
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::IncrementalRoot(address) => Some(*address),
                _ => None,
            })
            .collect()
    }

    /// Write the log in edge-log format
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        fn addr(address: Option<usize>) -> String {
            match address {
                Some(address) => format!("{address:#x}"),
                None => "0x0".to_string(),
            }
        }

        for entry in &self.graph {
            match entry {
                LogEntry::RefCounted {
                    address,
                    ref_count,
                    name,
                } => writeln!(out, "{address:#x} [rc={ref_count}] {name}")?,
                LogEntry::Traced {
                    address,
                    marked,
                    name,
                } => {
                    let mark = if *marked { "gc.marked" } else { "gc" };
                    writeln!(out, "{address:#x} [{mark}] {name}")?
                }
                LogEntry::Edge { to, name, .. } => writeln!(out, "> {to:#x} {name}")?,
                LogEntry::WeakMapEntry {
                    map,
                    key,
                    key_delegate,
                    value,
                } => writeln!(
                    out,
                    "WeakMapEntry map={} key={} keyDelegate={} value={}",
                    addr(*map),
                    addr(*key),
                    addr(*key_delegate),
                    addr(*value)
                )?,
                LogEntry::IncrementalRoot(address) => {
                    writeln!(out, "IncrementalRoot {address:#x}")?
                }
                LogEntry::Root { .. } | LogEntry::Garbage(_) => {}
            }
        }
        writeln!(out, "==========")?;
        for entry in &self.results {
            match entry {
                LogEntry::Root {
                    address,
                    known_edges,
                } => writeln!(out, "{address:#x} [known={known_edges}]")?,
                LogEntry::Garbage(address) => writeln!(out, "{address:#x} [garbage]")?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecorderState {
    current: GraphLog,
    in_results: bool,
    finished: Vec<GraphLog>,
}

/// Listener that records every collection it observes
///
/// The log sits behind a mutex so a finished log can be handed to another
/// thread (e.g. one writing dumps to disk) while the collector keeps running.
#[derive(Default)]
pub struct RecordingListener {
    all_traces: bool,
    state: Mutex<RecorderState>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that asks for complete graphs
    pub fn all_traces() -> Self {
        Self {
            all_traces: true,
            ..Self::default()
        }
    }

    /// Logs of all collections that ran to completion, oldest first
    pub fn take_logs(&self) -> Vec<GraphLog> {
        std::mem::take(&mut self.state.lock().finished)
    }

    /// The most recent completed log
    pub fn last_log(&self) -> Option<GraphLog> {
        self.state.lock().finished.last().cloned()
    }

    fn record(&self, entry: LogEntry) {
        let mut state = self.state.lock();
        if state.in_results {
            state.current.results.push(entry);
        } else {
            state.current.graph.push(entry);
        }
    }
}

impl CollectorListener for RecordingListener {
    fn want_all_traces(&self) -> bool {
        self.all_traces
    }

    fn begin(&self) {
        let mut state = self.state.lock();
        state.current = GraphLog::default();
        state.in_results = false;
    }

    fn note_refcounted_object(&self, address: usize, ref_count: u32, name: &str) {
        self.record(LogEntry::RefCounted {
            address,
            ref_count,
            name: name.to_string(),
        });
    }

    fn note_traced_object(&self, address: usize, marked: bool, name: &str) {
        self.record(LogEntry::Traced {
            address,
            marked,
            name: name.to_string(),
        });
    }

    fn note_edge(&self, from: usize, to: usize, name: &str) {
        self.record(LogEntry::Edge {
            from,
            to,
            name: name.to_string(),
        });
    }

    fn note_weak_map_entry(
        &self,
        map: Option<usize>,
        key: Option<usize>,
        key_delegate: Option<usize>,
        value: Option<usize>,
    ) {
        self.record(LogEntry::WeakMapEntry {
            map,
            key,
            key_delegate,
            value,
        });
    }

    fn note_incremental_root(&self, address: usize) {
        self.record(LogEntry::IncrementalRoot(address));
    }

    fn begin_results(&self) {
        self.state.lock().in_results = true;
    }

    fn describe_root(&self, address: usize, known_edges: u32) {
        self.record(LogEntry::Root {
            address,
            known_edges,
        });
    }

    fn describe_garbage(&self, address: usize) {
        self.record(LogEntry::Garbage(address));
    }

    fn end(&self) {
        let mut state = self.state.lock();
        let mut log = std::mem::take(&mut state.current);
        log.complete = true;
        state.finished.push(log);
        state.in_results = false;
    }
}
