//! The read/write API binding the graph store and the expression compiler.
//!
//! Reads open a snapshot (optionally at a historical range version) and never
//! return partial results. Writes check the domain invariants against the
//! current snapshot, then either apply locally in one transaction or forward
//! the request to the store-and-forward daemon.

pub mod read;
pub mod write;

use std::sync::Arc;

use crate::backend::{Backend, Snapshot};
use crate::compiler::FunctionTable;
use crate::config::RangeConfig;
use crate::error::CResult;
use crate::mq::{MqRegistry, RequestQueueClient};
use crate::store::engine::Engine;
use crate::store::memory::Memory;

pub struct RangeApi<E: Engine> {
    backend: Backend<E>,
    config: RangeConfig,
    functions: Arc<FunctionTable<E>>,
    stored: Option<RequestQueueClient>,
}

impl RangeApi<Memory> {
    /// An API over a scratch in-memory engine.
    pub fn open_memory(config: RangeConfig) -> CResult<Self> {
        Self::new(config, Memory::new())
    }
}

impl<E: Engine> RangeApi<E> {
    /// Opens the API with local writes. `use_stored` is ignored without a
    /// queue registry; use [`RangeApi::with_forwarding`] for that.
    pub fn new(config: RangeConfig, engine: E) -> CResult<Self> {
        let functions = Arc::new(FunctionTable::builtin_subset(&config.range_symbol_table));
        Ok(Self { backend: Backend::new(engine)?, config, functions, stored: None })
    }

    /// Opens the API with a forwarding client. When `use_stored` is set,
    /// every write is serialized to the daemon's request queue and the ack
    /// decides the outcome.
    pub fn with_forwarding(
        config: RangeConfig,
        engine: E,
        registry: &MqRegistry,
    ) -> CResult<Self> {
        let stored = if config.use_stored {
            Some(RequestQueueClient::new(registry, &config))
        } else {
            None
        };
        let functions = Arc::new(FunctionTable::builtin_subset(&config.range_symbol_table));
        Ok(Self { backend: Backend::new(engine)?, config, functions, stored })
    }

    pub fn backend(&self) -> &Backend<E> {
        &self.backend
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionTable<E> {
        &self.functions
    }

    /// The current range version.
    pub fn range_version(&self) -> CResult<u64> {
        self.backend.range_version()
    }

    pub(crate) fn snapshot(&self, version: Option<u64>) -> CResult<Snapshot<'_, E>> {
        self.backend.snapshot(version)
    }

    pub(crate) fn stored_client(&self) -> Option<&RequestQueueClient> {
        self.stored.as_ref()
    }
}
