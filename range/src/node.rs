//! In-memory view of a node bound to a graph instance and a wanted version.
//!
//! Nodes never hold references to other nodes; relationships are by name, and
//! a node only lives as long as the transaction or snapshot it was read from.

use log::debug;

use crate::error::CResult;
use crate::graph;
use crate::record::{Direction, NodeRecord, NodeType};
use crate::store::engine::Engine;
use crate::store::txn::WriteTxn;
use crate::store::{graph_key, record_key, RecordType};

pub struct Node {
    graph: String,
    name: String,

    /// The list version this view is sliced at. None means latest.
    wanted_version: Option<u64>,

    record: NodeRecord,
}

impl Node {
    pub(crate) fn new(
        graph: &str,
        name: &str,
        wanted_version: Option<u64>,
        record: NodeRecord,
    ) -> Self {
        Self { graph: graph.to_string(), name: name.to_string(), wanted_version, record }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn node_type(&self) -> NodeType {
        self.record.node_type
    }

    /// The node's current list version.
    pub fn version(&self) -> u64 {
        self.record.list_version
    }

    /// The list version observers slice at.
    pub fn wanted_version(&self) -> u64 {
        self.wanted_version.unwrap_or(self.record.list_version)
    }

    pub fn crc32(&self) -> u32 {
        self.record.crc32
    }

    /// Validates the stored checksum against the record contents.
    pub fn is_valid(&self) -> bool {
        self.record.is_valid()
    }

    pub fn graph_versions(&self) -> &[u64] {
        &self.record.graph_versions
    }

    /// Neighbor names present at the wanted version.
    pub fn forward_edges(&self) -> Vec<String> {
        self.record.edges_at(Direction::Forward, self.wanted_version())
    }

    pub fn reverse_edges(&self) -> Vec<String> {
        self.record.edges_at(Direction::Reverse, self.wanted_version())
    }

    /// The tag table at the wanted version.
    pub fn tags(&self) -> std::collections::BTreeMap<String, Vec<String>> {
        self.record.tags_at(self.wanted_version())
    }

    pub(crate) fn record(&self) -> &NodeRecord {
        &self.record
    }

    /// Persists the record into the transaction and registers the change for
    /// the graph's changelog.
    pub(crate) fn write<E: Engine>(&mut self, txn: &mut WriteTxn<'_, E>) -> CResult<()> {
        let rkey = record_key(RecordType::Node, &self.name);
        let bytes = self.record.encode()?;
        txn.set_pending(graph_key(&self.graph, &rkey), bytes);
        txn.record_change(&self.graph, rkey, self.record.list_version);
        Ok(())
    }

    /// Persists the record without a changelog entry. Used for version-list
    /// maintenance that is not a logical mutation of the node.
    pub(crate) fn write_unlogged<E: Engine>(&mut self, txn: &mut WriteTxn<'_, E>) -> CResult<()> {
        let rkey = record_key(RecordType::Node, &self.name);
        let bytes = self.record.encode()?;
        txn.set_pending(graph_key(&self.graph, &rkey), bytes);
        Ok(())
    }

    pub(crate) fn set_type<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        node_type: NodeType,
    ) -> CResult<NodeType> {
        debug!("set_type {} {} -> {}", self.name, self.record.node_type, node_type);
        let old = self.record.set_type(node_type);
        self.write(txn)?;
        Ok(old)
    }

    /// Adds a forward edge to `other`, returning false if it is already
    /// present. With `sync_reverse`, records the matching reverse edge on
    /// `other` at its own new list version.
    pub fn add_forward_edge<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        other: &mut Node,
        sync_reverse: bool,
    ) -> CResult<bool> {
        debug!("add_forward_edge {} -> {}", self.name, other.name);
        if !self.record.add_edge(Direction::Forward, &other.name) {
            return Ok(false);
        }
        self.write(txn)?;
        txn.bump_counter(&self.graph, graph::N_EDGES, 1)?;
        if sync_reverse && other.record.add_edge(Direction::Reverse, &self.name) {
            other.write(txn)?;
            txn.bump_counter(&other.graph, graph::N_REDGES, 1)?;
        }
        Ok(true)
    }

    pub fn add_reverse_edge<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        other: &mut Node,
        sync_forward: bool,
    ) -> CResult<bool> {
        debug!("add_reverse_edge {} <- {}", self.name, other.name);
        if !self.record.add_edge(Direction::Reverse, &other.name) {
            return Ok(false);
        }
        self.write(txn)?;
        txn.bump_counter(&self.graph, graph::N_REDGES, 1)?;
        if sync_forward && other.record.add_edge(Direction::Forward, &self.name) {
            other.write(txn)?;
            txn.bump_counter(&other.graph, graph::N_EDGES, 1)?;
        }
        Ok(true)
    }

    /// Removes a forward edge, returning false if it is not present at the
    /// current version. Prior versions keep the edge.
    pub fn remove_forward_edge<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        other: &mut Node,
        sync_reverse: bool,
    ) -> CResult<bool> {
        debug!("remove_forward_edge {} -> {}", self.name, other.name);
        if !self.record.remove_edge(Direction::Forward, &other.name) {
            return Ok(false);
        }
        self.write(txn)?;
        txn.bump_counter(&self.graph, graph::N_EDGES, -1)?;
        if sync_reverse && other.record.remove_edge(Direction::Reverse, &self.name) {
            other.write(txn)?;
            txn.bump_counter(&other.graph, graph::N_REDGES, -1)?;
        }
        Ok(true)
    }

    pub fn remove_reverse_edge<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        other: &mut Node,
        sync_forward: bool,
    ) -> CResult<bool> {
        debug!("remove_reverse_edge {} <- {}", self.name, other.name);
        if !self.record.remove_edge(Direction::Reverse, &other.name) {
            return Ok(false);
        }
        self.write(txn)?;
        txn.bump_counter(&self.graph, graph::N_REDGES, -1)?;
        if sync_forward && other.record.remove_edge(Direction::Forward, &self.name) {
            other.write(txn)?;
            txn.bump_counter(&other.graph, graph::N_EDGES, -1)?;
        }
        Ok(true)
    }

    /// Replaces the value list of a tag key.
    pub fn update_tag<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        key: &str,
        values: &[String],
    ) -> CResult<()> {
        debug!("update_tag {} {}={:?}", self.name, key, values);
        self.record.update_tag(key, values);
        self.write(txn)
    }

    /// Deletes a tag key, returning false if it is not present.
    pub fn delete_tag<E: Engine>(&mut self, txn: &mut WriteTxn<'_, E>, key: &str) -> CResult<bool> {
        debug!("delete_tag {} {}", self.name, key);
        if !self.record.delete_tag(key) {
            return Ok(false);
        }
        self.write(txn)?;
        Ok(true)
    }

    /// Records a graph version the node is live at. This is version-list
    /// maintenance, not a logical change, so it does not hit the changelog.
    pub(crate) fn add_graph_version<E: Engine>(
        &mut self,
        txn: &mut WriteTxn<'_, E>,
        version: u64,
    ) -> CResult<bool> {
        if !self.record.add_graph_version(version) {
            return Ok(false);
        }
        self.write_unlogged(txn)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeRecord;
    use crate::store::memory::Memory;
    use std::sync::Mutex;

    fn fresh(graph: &str, name: &str) -> Node {
        Node::new(graph, name, None, NodeRecord::default())
    }

    #[test]
    fn synced_edges_mirror_on_both_nodes() -> CResult<()> {
        let mutex = Mutex::new(Memory::new());
        let mut txn = WriteTxn::begin(&mutex)?;

        let mut parent = fresh("primary", "env#web");
        let mut child = fresh("primary", "host1");
        parent.set_type(&mut txn, NodeType::Cluster)?;
        child.set_type(&mut txn, NodeType::Host)?;

        assert!(parent.add_forward_edge(&mut txn, &mut child, true)?);
        assert_eq!(parent.forward_edges(), vec!["host1"]);
        assert_eq!(child.reverse_edges(), vec!["env#web"]);

        // The mirror lands at each node's own new list version.
        assert_eq!(parent.version(), 2);
        assert_eq!(child.version(), 2);

        // Re-adding the live edge is refused and does not bump.
        assert!(!parent.add_forward_edge(&mut txn, &mut child, true)?);
        assert_eq!(parent.version(), 2);
        Ok(())
    }

    #[test]
    fn historical_view_ignores_later_mutations() -> CResult<()> {
        let mutex = Mutex::new(Memory::new());
        let mut txn = WriteTxn::begin(&mutex)?;

        let mut cluster = fresh("primary", "env#c");
        let mut a = fresh("primary", "a");
        let mut b = fresh("primary", "b");
        cluster.set_type(&mut txn, NodeType::Cluster)?; // v1
        cluster.add_forward_edge(&mut txn, &mut a, true)?; // v2
        cluster.add_forward_edge(&mut txn, &mut b, true)?; // v3
        cluster.remove_forward_edge(&mut txn, &mut a, true)?; // v4

        let frozen = Node::new("primary", "env#c", Some(3), cluster.record().clone());
        assert_eq!(frozen.forward_edges(), vec!["a", "b"]);
        assert_eq!(cluster.forward_edges(), vec!["b"]);
        Ok(())
    }
}
