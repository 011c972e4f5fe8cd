pub mod engine;
pub mod memory;
pub mod txn;

use std::ops::Bound;

use serde_derive::{Deserialize, Serialize};

/// The state of a storage engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The name of the storage engine.
    pub name: String,

    /// The number of live keys in the engine.
    pub keys: u64,

    /// The logical size of live key/value pairs.
    pub size: u64,
}

/// Record types namespacing keys within a graph keyspace. Node records, node
/// metadata, and graph-wide metadata share one keyspace per graph; the type
/// tag keeps them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Node = 0,
    NodeMeta = 1,
    GraphMeta = 2,
    Unknown = 3,
}

/// Field separator within record keys. Control characters keep the prefix out
/// of the bareword alphabet, so node names can never collide with it.
const KEY_SEP: char = '\u{7}';

/// Builds the record key `<type>\a0\a<name>` used within a graph keyspace.
pub fn record_key(rtype: RecordType, name: &str) -> String {
    format!("{}{}0{}{}", rtype as u8, KEY_SEP, KEY_SEP, name)
}

/// Extracts the record type tag from a namespaced record key.
pub fn record_type_of(key: &str) -> RecordType {
    let tag: String = key.chars().take_while(|c| *c != KEY_SEP).collect();
    match tag.as_str() {
        "0" => RecordType::Node,
        "1" => RecordType::NodeMeta,
        "2" => RecordType::GraphMeta,
        _ => RecordType::Unknown,
    }
}

/// Strips the record-type prefix from a namespaced record key.
pub fn unprefix_record_key(key: &str) -> String {
    let prefix = record_key(record_type_of(key), "");
    key.strip_prefix(prefix.as_str()).unwrap_or(key).to_string()
}

/// Builds the full engine key for a record within a named graph keyspace.
/// The NUL separator sorts before every printable byte, so each keyspace is a
/// contiguous key range.
pub fn graph_key(graph: &str, rkey: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(graph.len() + 1 + rkey.len());
    key.extend_from_slice(graph.as_bytes());
    key.push(0);
    key.extend_from_slice(rkey.as_bytes());
    key
}

/// The prefix covering every record of one type within a graph keyspace.
pub fn graph_prefix(graph: &str, rtype: RecordType) -> Vec<u8> {
    graph_key(graph, &record_key(rtype, ""))
}

/// The engine key range a prefix covers. Engines answer prefix cursors with
/// it and the transaction overlay slices its buffered writes by it. The
/// exclusive end comes from rolling the last non-0xff byte over; a prefix of
/// nothing but 0xff bytes has no upper bound.
pub fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = Bound::Included(prefix.to_vec());
    let mut end = prefix.to_vec();
    loop {
        match end.pop() {
            Some(byte) if byte < 0xff => {
                end.push(byte + 1);
                return (start, Bound::Excluded(end));
            }
            Some(_) => continue,
            None => return (start, Bound::Unbounded),
        }
    }
}

/// The shared keyspace holding the graph list and the range changelist.
pub const INFO_DB: &str = "graph_info";

/// Builds a key in the shared info keyspace. Info keys are not record-typed.
pub fn info_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(INFO_DB.len() + 1 + name.len());
    key.extend_from_slice(INFO_DB.as_bytes());
    key.push(0);
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_round_trip() {
        for rtype in [RecordType::Node, RecordType::NodeMeta, RecordType::GraphMeta] {
            let key = record_key(rtype, "env#cluster1");
            assert_eq!(record_type_of(&key), rtype);
            assert_eq!(unprefix_record_key(&key), "env#cluster1");
        }
        assert_eq!(record_type_of("9\u{7}0\u{7}x"), RecordType::Unknown);
    }

    #[test]
    fn graph_keys_are_disjoint_by_graph() {
        let a = graph_key("primary", &record_key(RecordType::Node, "web1"));
        let b = graph_key("dependency", &record_key(RecordType::Node, "web1"));
        assert_ne!(a, b);
        assert!(a.starts_with(&graph_prefix("primary", RecordType::Node)));
        assert!(!b.starts_with(&graph_prefix("primary", RecordType::Node)));
    }

    #[test]
    fn prefix_bounds_roll_the_last_byte() {
        assert_eq!(
            prefix_bounds(b"ab"),
            (Bound::Included(b"ab".to_vec()), Bound::Excluded(b"ac".to_vec()))
        );
        // Trailing 0xff bytes are dropped before the rollover.
        assert_eq!(
            prefix_bounds(b"a\xff\xff"),
            (Bound::Included(b"a\xff\xff".to_vec()), Bound::Excluded(b"b".to_vec()))
        );
        // All-0xff and empty prefixes cover everything from their start.
        assert_eq!(
            prefix_bounds(b"\xff\xff"),
            (Bound::Included(b"\xff\xff".to_vec()), Bound::Unbounded)
        );
        assert_eq!(prefix_bounds(b""), (Bound::Included(Vec::new()), Bound::Unbounded));
    }

    #[test]
    fn graph_prefix_bounds_cover_exactly_one_keyspace() {
        let prefix = graph_prefix("primary", RecordType::Node);
        let (start, end) = prefix_bounds(&prefix);
        assert_eq!(start, Bound::Included(prefix.clone()));

        let inside = graph_key("primary", &record_key(RecordType::Node, "zz"));
        let outside = graph_key("primary", &record_key(RecordType::GraphMeta, "changelist"));
        let Bound::Excluded(end) = end else { panic!("expected a bounded range") };
        assert!(prefix <= inside && inside < end);
        assert!(outside >= end);
    }
}
