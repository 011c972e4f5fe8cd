use crate::error::CResult;
use crate::store::Status;

/// The face of the external key/value store the graph store runs on.
///
/// Keys are the namespaced record keys built by [`crate::store::graph_key`]:
/// ordered byte strings where every graph keyspace and record type is one
/// contiguous range. That is all the graph layer needs — point operations
/// plus prefix cursors over those ranges. Transactional consistency is not
/// the engine's job: the backend coordinator serializes access behind its
/// lock, so a cursor always walks the caller's snapshot. Writes are only
/// guaranteed durable after calling flush().
///
/// All methods take a mutable reference; access is serial by construction.
pub trait Engine: Send + 'static {
    /// The cursor returned by scan_prefix(). Yields pairs in key order and
    /// can be reversed.
    type Cursor<'a>: DoubleEndedIterator<Item = CResult<(Vec<u8>, Vec<u8>)>> + 'a
    where
        Self: 'a;

    /// Gets a value for a key, if it exists.
    fn get(&mut self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    /// Sets a value for a key, replacing the existing value if any.
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> CResult<()>;

    /// Deletes a key, or does nothing if it does not exist.
    fn delete(&mut self, key: &[u8]) -> CResult<()>;

    /// Opens a cursor over every key/value pair under the prefix. The graph
    /// layer only ever scans record-type prefixes and whole graph keyspaces;
    /// the covered key range is [`crate::store::prefix_bounds`].
    fn scan_prefix(&mut self, prefix: &[u8]) -> Self::Cursor<'_>;

    /// Flushes any buffered data to the underlying storage medium.
    fn flush(&mut self) -> CResult<()>;

    /// Returns engine status.
    fn status(&mut self) -> CResult<Status>;
}
