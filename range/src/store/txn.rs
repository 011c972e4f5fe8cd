use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::error::{CResult, Error};
use crate::store::engine::Engine;
use crate::store::prefix_bounds;

/// Read access to the store, shared by transactions and snapshots. Reads go
/// through whatever consistent view the implementor holds.
pub trait KvRead {
    fn get_raw(&self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    /// Returns every key/value pair under the prefix, in key order.
    fn scan_raw(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// A write transaction. Holds the engine lock for its whole lifetime, so its
/// reads are a consistent point-in-time view and its writes become visible
/// atomically at commit. Writes are buffered in an overlay and applied to the
/// engine only when the graph layer commits; dropping the guard without
/// committing discards them.
pub struct WriteTxn<'b, E: Engine> {
    engine: RefCell<MutexGuard<'b, E>>,

    /// Buffered writes; None is a pending deletion.
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,

    /// Node-record change items per graph, in write order: (namespaced record
    /// key, object version). These become the changelog entries at commit.
    changes: BTreeMap<String, Vec<(String, u64)>>,

    /// Graphs enrolled in this transaction, in enrollment order. Each gets a
    /// changelog entry (and so a version bump) at commit.
    enrolled: Vec<String>,

    /// Nodes removed in this transaction, per graph. The commit-time liveness
    /// pass skips them so their graph_versions list is not extended.
    removed: BTreeSet<(String, String)>,

    committed: bool,
}

impl<'b, E: Engine> WriteTxn<'b, E> {
    pub(crate) fn begin(mutex: &'b Mutex<E>) -> CResult<Self> {
        let guard = mutex
            .lock()
            .map_err(|e| Error::DatabaseLocking(format!("engine lock poisoned: {}", e)))?;
        Ok(Self {
            engine: RefCell::new(guard),
            pending: BTreeMap::new(),
            changes: BTreeMap::new(),
            enrolled: Vec::new(),
            removed: BTreeSet::new(),
            committed: false,
        })
    }

    /// Buffers a write.
    pub(crate) fn set_pending(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    /// Buffers a deletion.
    pub(crate) fn delete_pending(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Registers a node-record change for the graph's changelog.
    pub(crate) fn record_change(&mut self, graph: &str, rkey: String, version: u64) {
        self.changes.entry(graph.to_string()).or_default().push((rkey, version));
    }

    pub(crate) fn changes_for(&self, graph: &str) -> &[(String, u64)] {
        self.changes.get(graph).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn has_node_changes(&self) -> bool {
        self.changes.values().any(|items| !items.is_empty())
    }

    pub(crate) fn enroll_graph(&mut self, graph: &str) {
        if !self.enrolled.iter().any(|g| g == graph) {
            self.enrolled.push(graph.to_string());
        }
    }

    pub(crate) fn enrolled_graphs(&self) -> Vec<String> {
        self.enrolled.clone()
    }

    pub(crate) fn mark_removed(&mut self, graph: &str, name: &str) {
        self.removed.insert((graph.to_string(), name.to_string()));
    }

    pub(crate) fn is_removed(&self, graph: &str, name: &str) -> bool {
        self.removed.contains(&(graph.to_string(), name.to_string()))
    }

    /// Applies every buffered write to the engine and flushes it. Called by
    /// the graph layer after it has appended changelogs; the engine lock is
    /// held throughout, so readers never observe an intermediate state.
    pub(crate) fn apply(&mut self) -> CResult<()> {
        let mut engine = self.engine.borrow_mut();
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(value) => engine.put(&key, value)?,
                None => engine.delete(&key)?,
            }
        }
        engine.flush()?;
        self.committed = true;
        Ok(())
    }
}

impl<'b, E: Engine> KvRead for WriteTxn<'b, E> {
    fn get_raw(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        if let Some(value) = self.pending.get(key) {
            return Ok(value.clone());
        }
        self.engine.borrow_mut().get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .engine
            .borrow_mut()
            .scan_prefix(prefix)
            .map(|r| r.map(|(k, v)| (k, Some(v))))
            .collect::<CResult<_>>()?;
        for (key, value) in self.pending.range(prefix_bounds(prefix)) {
            merged.insert(key.clone(), value.clone());
        }
        Ok(merged.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
    }
}

impl<'b, E: Engine> Drop for WriteTxn<'b, E> {
    fn drop(&mut self) {
        if !self.committed && !self.pending.is_empty() {
            debug!("aborting write transaction with {} buffered writes", self.pending.len());
        }
    }
}
