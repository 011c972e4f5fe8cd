//! On-disk node record and its version-list mechanics.
//!
//! Every mutation of a node bumps `list_version` and extends the version list
//! of every edge and tag that remains present, so slicing any list by a past
//! version reproduces the node as it was. Removal is modeled by *not*
//! extending the removed entry's list into the new version.

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};

const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Node types. Environments are roots, clusters group clusters and hosts,
/// hosts are leaves. UNKNOWN is the state between create and set_type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Environment,
    Cluster,
    Host,
    #[default]
    Unknown,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Environment => write!(f, "ENVIRONMENT"),
            NodeType::Cluster => write!(f, "CLUSTER"),
            NodeType::Host => write!(f, "HOST"),
            NodeType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Which adjacency list an edge operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// One adjacency record: the neighbor's name and the sorted ascending set of
/// list versions at which the edge was present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: String,
    pub versions: Vec<u64>,
}

/// One tag value and the key_versions at which it was part of the value list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub data: String,
    pub versions: Vec<u64>,
}

/// One tag key. `versions` holds the list versions at which the key was
/// present; `revisions[k]` holds the list version at which key_version `k`
/// was written, which is what maps a wanted list version back to the
/// key_version whose values apply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub key: String,
    pub key_version: u64,
    pub versions: Vec<u64>,
    pub revisions: Vec<u64>,
    pub values: Vec<TagValue>,
}

/// The serialized node record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_type: NodeType,
    pub list_version: u64,
    pub crc32: u32,
    pub tags: Vec<TagRecord>,
    pub forward: Vec<EdgeRecord>,
    pub reverse: Vec<EdgeRecord>,
    pub graph_versions: Vec<u64>,
}

/// True if the sorted ascending list contains `version`. Walks from the end
/// since the queried version is usually near the tip.
fn contains_version(versions: &[u64], version: u64) -> bool {
    for v in versions.iter().rev() {
        if *v == version {
            return true;
        }
        if *v < version {
            return false;
        }
    }
    false
}

/// Appends `new` to the list if it holds `cmp` (the entry is live) and does
/// not already hold `new`.
fn update_unique_new_version(versions: &mut Vec<u64>, cmp: u64, new: u64) {
    if contains_version(versions, new) {
        return;
    }
    if contains_version(versions, cmp) {
        versions.push(new);
    }
}

impl NodeRecord {
    pub fn decode(bytes: &[u8]) -> CResult<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serializes the record with the crc field recomputed over the encoding
    /// that has crc32 zeroed.
    pub fn encode(&mut self) -> CResult<Vec<u8>> {
        self.crc32 = 0;
        let zeroed = bincode::serialize(self)?;
        self.crc32 = CRC.checksum(&zeroed);
        Ok(bincode::serialize(self)?)
    }

    /// Recomputes the checksum and compares it against the stored one.
    pub fn is_valid(&self) -> bool {
        let mut copy = self.clone();
        copy.crc32 = 0;
        match bincode::serialize(&copy) {
            Ok(zeroed) => CRC.checksum(&zeroed) == self.crc32,
            Err(_) => false,
        }
    }

    fn edges(&self, direction: Direction) -> &Vec<EdgeRecord> {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    fn edges_mut(&mut self, direction: Direction) -> &mut Vec<EdgeRecord> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }

    /// Neighbor names whose edge is present at `version`.
    pub fn edges_at(&self, direction: Direction, version: u64) -> Vec<String> {
        self.edges(direction)
            .iter()
            .filter(|e| contains_version(&e.versions, version))
            .map(|e| e.id.clone())
            .collect()
    }

    /// True if the named edge is present at `version`.
    pub fn has_edge_at(&self, direction: Direction, id: &str, version: u64) -> bool {
        self.edges(direction)
            .iter()
            .any(|e| e.id == id && contains_version(&e.versions, version))
    }

    /// The tag table at `version`: for each key present, the values of the
    /// key_version that was current at that list version.
    pub fn tags_at(&self, version: u64) -> std::collections::BTreeMap<String, Vec<String>> {
        let mut table = std::collections::BTreeMap::new();
        for tag in &self.tags {
            if !contains_version(&tag.versions, version) {
                continue;
            }
            let Some(key_version) = tag
                .revisions
                .iter()
                .enumerate()
                .rev()
                .find(|(_, lv)| **lv <= version)
                .map(|(k, _)| k as u64)
            else {
                continue;
            };
            let values = tag
                .values
                .iter()
                .filter(|v| contains_version(&v.versions, key_version))
                .map(|v| v.data.clone())
                .collect();
            table.insert(tag.key.clone(), values);
        }
        table
    }

    fn update_all_edge_versions(&mut self, cmp: u64, new: u64) {
        for direction in [Direction::Forward, Direction::Reverse] {
            for edge in self.edges_mut(direction) {
                update_unique_new_version(&mut edge.versions, cmp, new);
            }
        }
    }

    fn update_tag_versions(&mut self, cmp: u64, new: u64) {
        for tag in &mut self.tags {
            update_unique_new_version(&mut tag.versions, cmp, new);
        }
    }

    /// Starts a mutation: bumps list_version and extends every live edge and
    /// tag into the new version. Returns (old, new).
    fn bump(&mut self) -> (u64, u64) {
        let cmp = self.list_version;
        let new = cmp + 1;
        self.update_all_edge_versions(cmp, new);
        self.update_tag_versions(cmp, new);
        self.list_version = new;
        (cmp, new)
    }

    /// Records a new type. Bumps the version so the change lands in the
    /// changelog like any other mutation.
    pub fn set_type(&mut self, node_type: NodeType) -> NodeType {
        let old = self.node_type;
        self.bump();
        self.node_type = node_type;
        old
    }

    /// Adds an edge, returning false if it is already present at the current
    /// version. A historically removed edge is resurrected.
    pub fn add_edge(&mut self, direction: Direction, id: &str) -> bool {
        if self.has_edge_at(direction, id, self.list_version) {
            return false;
        }
        let (_, new) = self.bump();
        let edges = self.edges_mut(direction);
        match edges.iter_mut().find(|e| e.id == id) {
            Some(edge) => edge.versions.push(new),
            None => edges.push(EdgeRecord { id: id.to_string(), versions: vec![new] }),
        }
        true
    }

    /// Removes an edge, returning false if it is not present at the current
    /// version. The removed edge's version list is simply not extended into
    /// the new version.
    pub fn remove_edge(&mut self, direction: Direction, id: &str) -> bool {
        if !self.has_edge_at(direction, id, self.list_version) {
            return false;
        }
        let (_, new) = self.bump();
        let edges = self.edges_mut(direction);
        if let Some(edge) = edges.iter_mut().find(|e| e.id == id) {
            if edge.versions.last() == Some(&new) {
                edge.versions.pop();
            }
        }
        true
    }

    /// Replaces the value list of a tag key. New keys start at key_version 0;
    /// existing keys get an incremented key_version. Values missing from
    /// `values` simply do not receive the new key_version and remain readable
    /// at older versions.
    pub fn update_tag(&mut self, key: &str, values: &[String]) {
        let (_, new) = self.bump();
        let idx = match self.tags.iter().position(|t| t.key == key) {
            Some(idx) => {
                let tag = &mut self.tags[idx];
                tag.key_version += 1;
                if !contains_version(&tag.versions, new) {
                    tag.versions.push(new);
                }
                idx
            }
            None => {
                self.tags.push(TagRecord {
                    key: key.to_string(),
                    key_version: 0,
                    versions: vec![new],
                    revisions: Vec::new(),
                    values: Vec::new(),
                });
                self.tags.len() - 1
            }
        };
        let tag = &mut self.tags[idx];
        tag.revisions.push(new);
        let key_version = tag.key_version;
        for value in values {
            match tag.values.iter_mut().find(|v| v.data == *value) {
                Some(v) => {
                    if !contains_version(&v.versions, key_version) {
                        v.versions.push(key_version);
                    }
                }
                None => tag
                    .values
                    .push(TagValue { data: value.clone(), versions: vec![key_version] }),
            }
        }
    }

    /// Deletes a tag key, returning false if it is not present at the current
    /// version. Historical values remain readable at older versions.
    pub fn delete_tag(&mut self, key: &str) -> bool {
        let live = self
            .tags
            .iter()
            .any(|t| t.key == key && contains_version(&t.versions, self.list_version));
        if !live {
            return false;
        }
        let (_, new) = self.bump();
        if let Some(tag) = self.tags.iter_mut().find(|t| t.key == key) {
            if tag.versions.last() == Some(&new) {
                tag.versions.pop();
            }
        }
        true
    }

    /// Appends a graph version. Entries only grow; re-adding an existing or
    /// older version is a no-op.
    pub fn add_graph_version(&mut self, version: u64) -> bool {
        match self.graph_versions.last() {
            Some(last) if *last >= version => false,
            _ => {
                self.graph_versions.push(version);
                true
            }
        }
    }

    /// True if the node is a graph member at exactly this graph version.
    pub fn live_at_graph_version(&self, version: u64) -> bool {
        contains_version(&self.graph_versions, version)
    }
}
