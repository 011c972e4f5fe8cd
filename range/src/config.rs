use serde_derive::{Deserialize, Serialize};

/// Engine configuration. Every option has a default; unknown keys in a
/// deserialized config are rejected by serde as usual.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Filesystem directory for the KV environment. Consumed by the concrete
    /// engine the embedder opens; the in-memory engine ignores it.
    pub db_home: std::path::PathBuf,

    /// KV cache size in bytes, passed to the concrete engine.
    pub cache_size: u64,

    /// If true, writes are serialized and sent to the forwarding daemon
    /// instead of being applied locally.
    pub use_stored: bool,

    /// Name of the daemon's request queue.
    pub stored_mq_name: String,

    /// Milliseconds before a queued request is considered failed.
    pub stored_request_timeout: u64,

    /// Milliseconds before waiting for an ack times out.
    pub reader_ack_timeout: u64,

    /// The functions registered in the lexer/evaluator symbol table.
    pub range_symbol_table: Vec<String>,
}

impl Default for RangeConfig {
    fn default() -> Self {
        RangeConfig {
            db_home: std::path::PathBuf::from("/var/lib/rangexx"),
            cache_size: 67_108_864,
            use_stored: false,
            stored_mq_name: "rangexx_request".to_string(),
            stored_request_timeout: 10_000,
            reader_ack_timeout: 30_000,
            range_symbol_table: vec![
                "expand".to_string(),
                "expand_hosts".to_string(),
                "clusters".to_string(),
                "all_clusters".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_all_builtins() {
        let config = RangeConfig::default();
        assert!(!config.use_stored);
        assert_eq!(config.range_symbol_table.len(), 4);
    }

    #[test]
    fn round_trips_through_serde() {
        let mut config = RangeConfig::default();
        config.use_stored = true;
        config.stored_mq_name = "testq".to_string();
        let json = serde_json::to_string(&config).unwrap();
        let back: RangeConfig = serde_json::from_str(&json).unwrap();
        assert!(back.use_stored);
        assert_eq!(back.stored_mq_name, "testq");
    }
}
