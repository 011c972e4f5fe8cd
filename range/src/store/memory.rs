use std::collections::{btree_map, BTreeMap};

use crate::error::CResult;
use crate::store::engine::Engine;
use crate::store::{prefix_bounds, Status};

/// An in-memory engine backed by a BTreeMap. Nothing is persisted; this is
/// what the test suite runs on, and the cheapest way to embed a scratch
/// instance.
pub struct Memory {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memory {
    pub fn new() -> Self {
        Self { data: BTreeMap::new() }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for Memory {
    type Cursor<'a> = MemoryCursor<'a>;

    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.data.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> CResult<()> {
        self.data.remove(key);
        Ok(())
    }

    fn scan_prefix(&mut self, prefix: &[u8]) -> Self::Cursor<'_> {
        MemoryCursor { inner: self.data.range(prefix_bounds(prefix)) }
    }

    fn flush(&mut self) -> CResult<()> {
        Ok(())
    }

    fn status(&mut self) -> CResult<Status> {
        Ok(Status {
            name: "memory".to_string(),
            keys: self.data.len() as u64,
            size: self.data.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum(),
        })
    }
}

pub struct MemoryCursor<'a> {
    inner: btree_map::Range<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> Iterator for MemoryCursor<'a> {
    type Item = CResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| Ok((k.clone(), v.clone())))
    }
}

impl<'a> DoubleEndedIterator for MemoryCursor<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, v)| Ok((k.clone(), v.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{graph_key, graph_prefix, record_key, RecordType};

    /// A node record key in a named graph keyspace.
    fn nkey(graph: &str, name: &str) -> Vec<u8> {
        graph_key(graph, &record_key(RecordType::Node, name))
    }

    #[test]
    fn point_ops() -> CResult<()> {
        let mut engine = Memory::new();
        let key = nkey("primary", "web1");

        assert_eq!(engine.get(&key)?, None);
        engine.put(&key, b"v0".to_vec())?;
        assert_eq!(engine.get(&key)?, Some(b"v0".to_vec()));

        // Overwrites replace, deletes are idempotent.
        engine.put(&key, b"v1".to_vec())?;
        assert_eq!(engine.get(&key)?, Some(b"v1".to_vec()));
        engine.delete(&key)?;
        engine.delete(&key)?;
        assert_eq!(engine.get(&key)?, None);

        engine.flush()?;
        Ok(())
    }

    #[test]
    fn prefix_cursor_walks_one_keyspace() -> CResult<()> {
        let mut engine = Memory::new();
        engine.put(&nkey("primary", "a"), vec![1])?;
        engine.put(&nkey("primary", "b"), vec![2])?;
        engine.put(&nkey("dependency", "a"), vec![3])?;
        let meta = graph_key("primary", &record_key(RecordType::GraphMeta, "changelist"));
        engine.put(&meta, vec![4])?;

        // Only the primary graph's node records, in key order.
        let nodes = engine
            .scan_prefix(&graph_prefix("primary", RecordType::Node))
            .collect::<CResult<Vec<_>>>()?;
        assert_eq!(
            nodes,
            vec![
                (nkey("primary", "a"), vec![1]),
                (nkey("primary", "b"), vec![2]),
            ]
        );

        // Cursors reverse.
        let reversed = engine
            .scan_prefix(&graph_prefix("primary", RecordType::Node))
            .rev()
            .collect::<CResult<Vec<_>>>()?;
        assert_eq!(reversed.first().map(|(k, _)| k.clone()), Some(nkey("primary", "b")));

        // A keyspace with no records yields nothing.
        assert!(engine
            .scan_prefix(&graph_prefix("sidecar", RecordType::Node))
            .next()
            .is_none());
        Ok(())
    }

    #[test]
    fn prefix_cursor_survives_0xff_boundaries() -> CResult<()> {
        let mut engine = Memory::new();
        engine.put(b"\xff", vec![1])?;
        engine.put(b"\xff\xff", vec![2])?;
        engine.put(b"\xfe\xff", vec![3])?;

        let all_ff = engine.scan_prefix(b"\xff").collect::<CResult<Vec<_>>>()?;
        assert_eq!(
            all_ff,
            vec![(b"\xff".to_vec(), vec![1]), (b"\xff\xff".to_vec(), vec![2])]
        );

        let rolled = engine.scan_prefix(b"\xfe").collect::<CResult<Vec<_>>>()?;
        assert_eq!(rolled, vec![(b"\xfe\xff".to_vec(), vec![3])]);
        Ok(())
    }

    #[test]
    /// Runs random point operations against both the engine and a known-good
    /// BTreeMap, comparing results and the final state.
    fn random_point_ops_match_model() -> CResult<()> {
        use rand::{Rng, RngCore, SeedableRng};

        let seed: u64 = rand::thread_rng().gen();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        println!("seed = {}", seed);

        let mut engine = Memory::new();
        let mut model = BTreeMap::new();
        for _ in 0..1000 {
            let mut key = vec![0; rng.gen_range(1..=8)];
            rng.fill_bytes(&mut key);
            match rng.gen_range(0..3) {
                0 => {
                    let mut value = vec![0; rng.gen_range(0..=8)];
                    rng.fill_bytes(&mut value);
                    engine.put(&key, value.clone())?;
                    model.insert(key, value);
                }
                1 => {
                    engine.delete(&key)?;
                    model.remove(&key);
                }
                _ => assert_eq!(engine.get(&key)?, model.get(&key).cloned()),
            }
        }

        let state = engine.scan_prefix(b"").collect::<CResult<Vec<_>>>()?;
        let expect: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(state, expect);
        Ok(())
    }

    #[test]
    fn status_counts_live_data() -> CResult<()> {
        let mut engine = Memory::new();
        engine.put(b"foo", vec![1, 2, 3])?;
        engine.put(b"bar", vec![1])?;
        engine.delete(b"bar")?;
        engine.put(b"baz", vec![1])?;
        engine.put(b"baz", vec![2])?;

        let status = engine.status()?;
        assert_eq!(status.name, "memory");
        assert_eq!(status.keys, 2);
        assert_eq!(status.size, 10);
        Ok(())
    }
}
