//! Backend coordinator: owns the KV engine, the graph list, and the
//! range-level changelist that ties every graph's version history together.
//!
//! Advancing the range version snapshots the current version of every graph
//! instance, which is what lets a reader resolve "range version v" back to a
//! per-graph wanted version and from there to per-node list versions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::graph::{self, DEPENDENCY, PRIMARY};
use crate::node::Node;
use crate::record::NodeRecord;
use crate::store::engine::Engine;
use crate::store::txn::{KvRead, WriteTxn};
use crate::store::{info_key, record_key, RecordType};

const GRAPH_LIST: &str = "graph_list";
const RANGE_CHANGELIST: &str = "range_changelist";

/// One range changelist entry: the version of every graph instance at the
/// moment a writing transaction committed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeChange {
    pub timestamp_ms: i64,
    pub items: Vec<(String, u64)>,
}

/// The cross-graph version history. Its length is the range version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeChangeList {
    pub current_version: u64,
    pub changes: Vec<RangeChange>,
}

pub(crate) fn read_graph_list(kv: &dyn KvRead) -> CResult<Vec<String>> {
    match kv.get_raw(&info_key(GRAPH_LIST))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn read_range_changelist(kv: &dyn KvRead) -> CResult<RangeChangeList> {
    let rlist = match kv.get_raw(&info_key(RANGE_CHANGELIST))? {
        Some(bytes) => bincode::deserialize::<RangeChangeList>(&bytes)?,
        None => RangeChangeList::default(),
    };
    if rlist.current_version != rlist.changes.len() as u64 {
        return Err(Error::DatabaseVersioning(format!(
            "range changelist inconsistent, found: {}, expected: {}",
            rlist.changes.len(),
            rlist.current_version
        )));
    }
    Ok(rlist)
}

/// Appends a new range version recording every graph's current version.
/// Called by the graph layer when a committing transaction changed at least
/// one node record.
pub(crate) fn append_range_version<E: Engine>(
    txn: &mut WriteTxn<'_, E>,
    timestamp_ms: i64,
) -> CResult<u64> {
    let mut items = Vec::new();
    for graph in read_graph_list(&*txn)? {
        let version = graph::read_changelist(&*txn, &graph)?.current_version;
        items.push((graph, version));
    }
    let mut rlist = read_range_changelist(&*txn)?;
    rlist.changes.push(RangeChange { timestamp_ms, items });
    rlist.current_version += 1;
    debug!("range version advanced to {}", rlist.current_version);
    txn.set_pending(info_key(RANGE_CHANGELIST), bincode::serialize(&rlist)?);
    Ok(rlist.current_version)
}

/// The backend coordinator. Cheap to clone; all clones share the engine.
pub struct Backend<E: Engine> {
    engine: Arc<Mutex<E>>,
}

impl<E: Engine> Clone for Backend<E> {
    fn clone(&self) -> Self {
        Backend { engine: self.engine.clone() }
    }
}

impl<E: Engine> Backend<E> {
    /// Opens the backend over an engine, seeding the primary and dependency
    /// graph instances on first use.
    pub fn new(engine: E) -> CResult<Self> {
        let engine = Arc::new(Mutex::new(engine));
        let backend = Backend { engine: engine.clone() };
        let mut txn = WriteTxn::begin(&engine)?;
        let mut graphs = read_graph_list(&txn)?;
        for name in [PRIMARY, DEPENDENCY] {
            if !graphs.iter().any(|g| g == name) {
                graphs.push(name.to_string());
            }
        }
        txn.set_pending(info_key(GRAPH_LIST), bincode::serialize(&graphs)?);
        txn.apply()?;
        Ok(backend)
    }

    /// Begins a write transaction. The engine lock is held until the guard is
    /// committed or dropped, so at most one transaction is in flight and its
    /// writes are invisible until commit.
    pub fn begin(&self) -> CResult<WriteTxn<'_, E>> {
        WriteTxn::begin(&self.engine)
    }

    /// The graph instances known to this backend.
    pub fn graphs(&self) -> CResult<Vec<String>> {
        let snapshot = self.snapshot(None)?;
        read_graph_list(&snapshot)
    }

    /// The current range version.
    pub fn range_version(&self) -> CResult<u64> {
        let snapshot = self.snapshot(None)?;
        Ok(snapshot.range_version())
    }

    /// Opens a consistent read snapshot, optionally at a historical range
    /// version. None means latest.
    pub fn snapshot(&self, version: Option<u64>) -> CResult<Snapshot<'_, E>> {
        Snapshot::open(&self.engine, version)
    }
}

/// A consistent point-in-time read view. Holds the engine lock, so the view
/// cannot change underneath it; concurrent writers block until it is dropped.
pub struct Snapshot<'b, E: Engine> {
    engine: RefCell<MutexGuard<'b, E>>,

    range_version: u64,

    /// The graph version this snapshot reads each graph at.
    wanted_versions: HashMap<String, u64>,

    /// Each graph's committed (latest) version.
    current_versions: HashMap<String, u64>,

    /// For historical snapshots: each node's list version as of the wanted
    /// graph version, keyed by namespaced record key.
    node_versions: HashMap<String, HashMap<String, u64>>,
}

struct RawRead<'b, 'g, E: Engine>(&'g RefCell<MutexGuard<'b, E>>);

impl<'b, 'g, E: Engine> KvRead for RawRead<'b, 'g, E> {
    fn get_raw(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        self.0.borrow_mut().get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.0.borrow_mut().scan_prefix(prefix).collect()
    }
}

impl<'b, E: Engine> Snapshot<'b, E> {
    fn open(mutex: &'b Mutex<E>, version: Option<u64>) -> CResult<Self> {
        let guard = mutex
            .lock()
            .map_err(|e| Error::DatabaseLocking(format!("engine lock poisoned: {}", e)))?;
        let engine = RefCell::new(guard);
        let kv = RawRead(&engine);

        let graphs = read_graph_list(&kv)?;
        let mut current_versions = HashMap::new();
        for graph in &graphs {
            let version = graph::read_changelist(&kv, graph)?.current_version;
            current_versions.insert(graph.clone(), version);
        }

        let rlist = read_range_changelist(&kv)?;
        let range_version = version.unwrap_or(rlist.current_version);
        if range_version > rlist.current_version {
            return Err(Error::DatabaseVersioning(format!(
                "range version {} not yet written, current is {}",
                range_version, rlist.current_version
            )));
        }

        let mut wanted_versions = HashMap::new();
        if range_version == rlist.current_version {
            wanted_versions.clone_from(&current_versions);
        } else if range_version > 0 {
            let entry = &rlist.changes[range_version as usize - 1];
            for graph in &graphs {
                let version = entry
                    .items
                    .iter()
                    .find(|(name, _)| name == graph)
                    .map(|(_, v)| *v)
                    .unwrap_or(0);
                wanted_versions.insert(graph.clone(), version);
            }
        } else {
            for graph in &graphs {
                wanted_versions.insert(graph.clone(), 0);
            }
        }

        // Resolve, for each rewound graph, every node's list version at the
        // wanted graph version: newest-first over the changelog, first hit
        // wins across entries, last item wins within one entry.
        let mut node_versions: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for graph in &graphs {
            let wanted = wanted_versions[graph];
            if wanted >= current_versions[graph] {
                continue;
            }
            let clist = graph::read_changelist(&kv, graph)?;
            let mut map = HashMap::new();
            for change in clist.changes[..wanted as usize].iter().rev() {
                for item in change.items.iter().rev() {
                    map.entry(item.key.clone()).or_insert(item.version);
                }
            }
            node_versions.insert(graph.clone(), map);
        }

        Ok(Self { engine, range_version, wanted_versions, current_versions, node_versions })
    }

    pub fn range_version(&self) -> u64 {
        self.range_version
    }

    /// The graph version this snapshot reads the named graph at.
    pub fn graph_version(&self, graph: &str) -> CResult<u64> {
        self.wanted_versions
            .get(graph)
            .copied()
            .ok_or_else(|| Error::UnknownTransaction(format!("no such graph instance: {}", graph)))
    }

    pub fn n_vertices(&self, graph: &str) -> CResult<u64> {
        graph::read_counter(self, graph, graph::N_VERTICES)
    }

    pub fn n_edges(&self, graph: &str) -> CResult<u64> {
        graph::read_counter(self, graph, graph::N_EDGES)
    }

    pub fn n_redges(&self, graph: &str) -> CResult<u64> {
        graph::read_counter(self, graph, graph::N_REDGES)
    }

    fn wrap(&self, graph: &str, name: &str, record: NodeRecord) -> CResult<Option<Node>> {
        let wanted = self.graph_version(graph)?;
        if !record.live_at_graph_version(wanted) {
            return Ok(None);
        }
        let list_version = if wanted == self.current_versions[graph] {
            None
        } else {
            self.node_versions
                .get(graph)
                .and_then(|map| map.get(&record_key(RecordType::Node, name)))
                .copied()
        };
        Ok(Some(Node::new(graph, name, list_version, record)))
    }

    /// Fetches a node at this snapshot's version, or None if it is not a
    /// graph member here.
    pub fn get_node(&self, graph: &str, name: &str) -> CResult<Option<Node>> {
        match graph::read_node_record(self, graph, name)? {
            Some(record) => self.wrap(graph, name, record),
            None => Ok(None),
        }
    }

    /// Fetches a node at the graph's latest version, regardless of the
    /// snapshot's wanted version. The dependency graph is read this way: it
    /// is not versioned in lockstep with the primary graph.
    pub fn get_node_latest(&self, graph: &str, name: &str) -> CResult<Option<Node>> {
        let Some(record) = graph::read_node_record(self, graph, name)? else {
            return Ok(None);
        };
        let current = *self
            .current_versions
            .get(graph)
            .ok_or_else(|| Error::UnknownTransaction(format!("no such graph instance: {}", graph)))?;
        if !record.live_at_graph_version(current) {
            return Ok(None);
        }
        Ok(Some(Node::new(graph, name, None, record)))
    }

    /// Every node live at this snapshot's version, in key order.
    pub fn nodes(&self, graph: &str) -> CResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for (name, record) in graph::scan_node_records(self, graph)? {
            if let Some(node) = self.wrap(graph, &name, record)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

impl<'b, E: Engine> KvRead for Snapshot<'b, E> {
    fn get_raw(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        self.engine.borrow_mut().get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.engine.borrow_mut().scan_prefix(prefix).collect()
    }
}
