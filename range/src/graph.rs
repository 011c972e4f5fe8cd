//! Graph instances: named node collections with a changelog.
//!
//! Two instances are always present: `primary` holds membership and
//! `dependency` holds inter-node dependencies over the same key space. A
//! graph's version is the length of its changelog; every committing write
//! transaction appends one change record per enrolled graph.

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::backend;
use crate::error::{CResult, Error};
use crate::node::Node;
use crate::record::NodeRecord;
use crate::store::engine::Engine;
use crate::store::txn::{KvRead, WriteTxn};
use crate::store::{graph_key, graph_prefix, record_key, unprefix_record_key, RecordType};

/// The membership graph.
pub const PRIMARY: &str = "primary";
/// The dependency graph.
pub const DEPENDENCY: &str = "dependency";

pub(crate) const CHANGELIST: &str = "changelist";
pub(crate) const N_VERTICES: &str = "n_vertices";
pub(crate) const N_EDGES: &str = "n_edges";
pub(crate) const N_REDGES: &str = "n_redges";

/// One changelog entry: the node records mutated by a single committed write
/// transaction. The key is the namespaced record key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub timestamp_ms: i64,
    pub items: Vec<ChangeItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub key: String,
    pub version: u64,
}

/// The per-graph changelog. Its length is the graph version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeList {
    pub current_version: u64,
    pub changes: Vec<Change>,
}

/// Reads and validates a graph's changelog.
pub(crate) fn read_changelist(kv: &dyn KvRead, graph: &str) -> CResult<ChangeList> {
    let key = graph_key(graph, &record_key(RecordType::GraphMeta, CHANGELIST));
    let clist = match kv.get_raw(&key)? {
        Some(bytes) => bincode::deserialize::<ChangeList>(&bytes)?,
        None => ChangeList::default(),
    };
    if clist.current_version != clist.changes.len() as u64 {
        return Err(Error::DatabaseVersioning(format!(
            "changelog inconsistent with graph version for {}, found: {}, expected: {}",
            graph,
            clist.changes.len(),
            clist.current_version
        )));
    }
    Ok(clist)
}

pub(crate) fn read_counter(kv: &dyn KvRead, graph: &str, name: &str) -> CResult<u64> {
    let key = graph_key(graph, &record_key(RecordType::GraphMeta, name));
    match kv.get_raw(&key)? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(0),
    }
}

/// Fetches and decodes a node record by name.
pub(crate) fn read_node_record(
    kv: &dyn KvRead,
    graph: &str,
    name: &str,
) -> CResult<Option<NodeRecord>> {
    let key = graph_key(graph, &record_key(RecordType::Node, name));
    match kv.get_raw(&key)? {
        Some(bytes) => Ok(Some(NodeRecord::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Every node record in the graph, in key order.
pub(crate) fn scan_node_records(
    kv: &dyn KvRead,
    graph: &str,
) -> CResult<Vec<(String, NodeRecord)>> {
    let prefix = graph_prefix(graph, RecordType::Node);
    let mut nodes = Vec::new();
    for (key, bytes) in kv.scan_raw(&prefix)? {
        let key = String::from_utf8(key[graph.len() + 1..].to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        nodes.push((unprefix_record_key(&key), NodeRecord::decode(&bytes)?));
    }
    Ok(nodes)
}

impl<'b, E: Engine> WriteTxn<'b, E> {
    /// Enrolls a graph in this transaction. Each enrolled graph gets a
    /// changelog entry (and so a version bump) at commit, whether or not any
    /// of its nodes changed.
    pub fn enroll(&mut self, graph: &str) -> CResult<()> {
        if !backend::read_graph_list(&*self)?.iter().any(|g| g == graph) {
            return Err(Error::UnknownTransaction(format!("no such graph instance: {}", graph)));
        }
        self.enroll_graph(graph);
        Ok(())
    }

    /// The graph's committed version (changelog length). A commit of this
    /// transaction would produce `graph_version + 1`.
    pub fn graph_version(&self, graph: &str) -> CResult<u64> {
        Ok(read_changelist(self, graph)?.current_version)
    }

    pub fn n_vertices(&self, graph: &str) -> CResult<u64> {
        read_counter(self, graph, N_VERTICES)
    }

    pub fn n_edges(&self, graph: &str) -> CResult<u64> {
        read_counter(self, graph, N_EDGES)
    }

    pub fn n_redges(&self, graph: &str) -> CResult<u64> {
        read_counter(self, graph, N_REDGES)
    }

    /// Fetches a node at the latest version within this transaction, or None
    /// if it does not exist or is not a current graph member.
    pub fn get_node(&self, graph: &str, name: &str) -> CResult<Option<Node>> {
        if self.is_removed(graph, name) {
            return Ok(None);
        }
        let Some(record) = read_node_record(self, graph, name)? else {
            return Ok(None);
        };
        let committed = self.graph_version(graph)?;
        match record.graph_versions.last() {
            Some(last) if *last >= committed => {
                Ok(Some(Node::new(graph, name, None, record)))
            }
            _ => Ok(None),
        }
    }

    /// Creates a node. Fails with NodeExists if the name is a graph member in
    /// the current snapshot; the node becomes visible at the graph version
    /// this transaction commits.
    pub fn create(&mut self, graph: &str, name: &str) -> CResult<Node> {
        self.enroll(graph)?;
        let committed = self.graph_version(graph)?;
        let existing = read_node_record(&*self, graph, name)?;
        if let Some(record) = &existing {
            if record.graph_versions.last().map_or(false, |last| *last >= committed) {
                return Err(Error::NodeExists(name.to_string()));
            }
        }
        debug!("create node {} in {}", name, graph);
        let mut node = Node::new(graph, name, None, existing.unwrap_or_default());
        if node.version() == 0 {
            node.write(self)?;
        }
        node.add_graph_version(self, committed + 1)?;
        self.bump_counter(graph, N_VERTICES, 1)?;
        Ok(node)
    }

    /// Removes a node: detaches it from every neighbor and stops extending
    /// its graph_versions list. Historical versions remain readable.
    pub fn remove(&mut self, graph: &str, node: &Node) -> CResult<()> {
        self.enroll(graph)?;
        let committed = self.graph_version(graph)?;
        if !node.record().graph_versions.last().map_or(false, |last| *last >= committed) {
            return Err(Error::NodeNotFound(node.name().to_string()));
        }
        debug!("remove node {} from {}", node.name(), graph);

        let name = node.name().to_string();
        for other_name in node.reverse_edges() {
            if other_name == name {
                continue;
            }
            if let Some(mut other) = self.get_node(graph, &other_name)? {
                let mut target = Node::new(graph, &name, None, node.record().clone());
                other.remove_forward_edge(self, &mut target, false)?;
            }
        }
        for other_name in node.forward_edges() {
            if other_name == name {
                continue;
            }
            if let Some(mut other) = self.get_node(graph, &other_name)? {
                let mut target = Node::new(graph, &name, None, node.record().clone());
                other.remove_reverse_edge(self, &mut target, false)?;
            }
        }

        self.mark_removed(graph, &name);
        self.bump_counter(graph, N_VERTICES, -1)?;
        Ok(())
    }

    /// Adjusts a graph-wide meta counter.
    pub(crate) fn bump_counter(&mut self, graph: &str, name: &str, delta: i64) -> CResult<()> {
        let value = read_counter(&*self, graph, name)?;
        let value = if delta >= 0 {
            value.saturating_add(delta as u64)
        } else {
            value.saturating_sub(delta.unsigned_abs())
        };
        let key = graph_key(graph, &record_key(RecordType::GraphMeta, name));
        self.set_pending(key, bincode::serialize(&value)?);
        Ok(())
    }

    /// Commits: extends the graph_versions list of every surviving node in
    /// each enrolled graph, appends one changelog entry per enrolled graph,
    /// advances the range version if any node record changed, and applies the
    /// buffered writes atomically. Returns the resulting range version.
    pub fn commit(mut self) -> CResult<u64> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        for graph in self.enrolled_graphs() {
            let committed = self.graph_version(&graph)?;
            let new_version = committed + 1;

            // Every node live at the committed version survives into the new
            // one unless it was removed in this transaction.
            for (name, mut record) in scan_node_records(&self, &graph)? {
                if self.is_removed(&graph, &name) {
                    continue;
                }
                if record.live_at_graph_version(committed) && record.add_graph_version(new_version)
                {
                    let mut node = Node::new(&graph, &name, None, record);
                    node.write_unlogged(&mut self)?;
                }
            }

            let mut clist = read_changelist(&self, &graph)?;
            let items = self
                .changes_for(&graph)
                .iter()
                .map(|(key, version)| ChangeItem { key: key.clone(), version: *version })
                .collect();
            clist.changes.push(Change { timestamp_ms, items });
            clist.current_version += 1;
            let key = graph_key(&graph, &record_key(RecordType::GraphMeta, CHANGELIST));
            self.set_pending(key, bincode::serialize(&clist)?);
            debug!("committing graph {} at version {}", graph, new_version);
        }

        let range_version = if self.has_node_changes() {
            backend::append_range_version(&mut self, timestamp_ms)?
        } else {
            backend::read_range_changelist(&self)?.current_version
        };

        self.apply()?;
        Ok(range_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::record::NodeType;
    use crate::store::memory::Memory;
    use pretty_assertions::assert_eq;

    fn backend() -> Backend<Memory> {
        Backend::new(Memory::new()).unwrap()
    }

    #[test]
    fn version_equals_changelog_length() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        assert_eq!(txn.graph_version(PRIMARY)?, 0);
        let mut n = txn.create(PRIMARY, "e")?;
        n.set_type(&mut txn, NodeType::Environment)?;
        txn.commit()?;

        let txn = backend.begin()?;
        assert_eq!(txn.graph_version(PRIMARY)?, 1);
        let clist = read_changelist(&txn, PRIMARY)?;
        assert_eq!(clist.changes.len(), 1);
        // Creation wrote the record at version 0, set_type at version 1.
        let versions: Vec<u64> = clist.changes[0].items.iter().map(|i| i.version).collect();
        assert_eq!(versions, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn create_then_duplicate_create_fails() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        txn.create(PRIMARY, "e")?;
        assert!(matches!(txn.create(PRIMARY, "e"), Err(Error::NodeExists(_))));
        txn.commit()?;

        let mut txn = backend.begin()?;
        assert!(matches!(txn.create(PRIMARY, "e"), Err(Error::NodeExists(_))));
        Ok(())
    }

    #[test]
    fn created_node_invisible_before_its_commit() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        let mut n = txn.create(PRIMARY, "e")?;
        n.set_type(&mut txn, NodeType::Environment)?;
        txn.commit()?;

        let txn = backend.begin()?;
        let node = txn.get_node(PRIMARY, "e")?.expect("node should exist");
        assert_eq!(node.graph_versions(), &[1]);
        Ok(())
    }

    #[test]
    fn remove_hides_node_but_preserves_history() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        let mut e = txn.create(PRIMARY, "e")?;
        e.set_type(&mut txn, NodeType::Environment)?;
        let mut c = txn.create(PRIMARY, "e#c")?;
        c.set_type(&mut txn, NodeType::Cluster)?;
        e.add_forward_edge(&mut txn, &mut c, true)?;
        txn.commit()?;

        let mut txn = backend.begin()?;
        let c = txn.get_node(PRIMARY, "e#c")?.expect("cluster exists");
        txn.remove(PRIMARY, &c)?;
        txn.commit()?;

        let txn = backend.begin()?;
        assert!(txn.get_node(PRIMARY, "e#c")?.is_none());
        // The environment lost its edge at the new version.
        let e = txn.get_node(PRIMARY, "e")?.expect("env exists");
        assert!(e.forward_edges().is_empty());
        // But the record history is still on disk.
        let rec = read_node_record(&txn, PRIMARY, "e#c")?.expect("record kept");
        assert_eq!(rec.graph_versions, vec![1]);
        Ok(())
    }

    #[test]
    fn survivors_gain_every_graph_version() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        let mut e = txn.create(PRIMARY, "e")?;
        e.set_type(&mut txn, NodeType::Environment)?;
        txn.commit()?;

        let mut txn = backend.begin()?;
        let mut c = txn.create(PRIMARY, "e#c")?;
        c.set_type(&mut txn, NodeType::Cluster)?;
        txn.commit()?;

        let txn = backend.begin()?;
        let e = txn.get_node(PRIMARY, "e")?.unwrap();
        assert_eq!(e.graph_versions(), &[1, 2]);
        let c = txn.get_node(PRIMARY, "e#c")?.unwrap();
        assert_eq!(c.graph_versions(), &[2]);
        Ok(())
    }

    #[test]
    fn counters_track_nodes_and_edges() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        let mut e = txn.create(PRIMARY, "e")?;
        e.set_type(&mut txn, NodeType::Environment)?;
        let mut c = txn.create(PRIMARY, "e#c")?;
        c.set_type(&mut txn, NodeType::Cluster)?;
        e.add_forward_edge(&mut txn, &mut c, true)?;
        assert_eq!(txn.n_vertices(PRIMARY)?, 2);
        assert_eq!(txn.n_edges(PRIMARY)?, 1);
        assert_eq!(txn.n_redges(PRIMARY)?, 1);
        txn.commit()?;

        let mut txn = backend.begin()?;
        let c = txn.get_node(PRIMARY, "e#c")?.unwrap();
        txn.remove(PRIMARY, &c)?;
        assert_eq!(txn.n_vertices(PRIMARY)?, 1);
        assert_eq!(txn.n_edges(PRIMARY)?, 0);
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn empty_enrollment_still_bumps_version() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        txn.enroll(PRIMARY)?;
        txn.commit()?;

        let txn = backend.begin()?;
        assert_eq!(txn.graph_version(PRIMARY)?, 1);
        let clist = read_changelist(&txn, PRIMARY)?;
        assert!(clist.changes[0].items.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_graph_cannot_be_enrolled() -> CResult<()> {
        let backend = backend();
        let mut txn = backend.begin()?;
        assert!(matches!(txn.enroll("sidecar"), Err(Error::UnknownTransaction(_))));
        Ok(())
    }
}
