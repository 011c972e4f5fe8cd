//! `range` is a versioned, persistent range query engine: a hierarchical
//! inventory of environments, clusters and hosts stored as two directed
//! graphs (membership and dependency), queried with a small set-algebra
//! expression language. Every mutation produces a new immutable version and
//! any prior version remains queryable.
//!
//! ## Getting started
//!
//! ```rust
//! use range::api::RangeApi;
//! use range::config::RangeConfig;
//!
//! fn main() -> range::error::CResult<()> {
//!     let api = RangeApi::open_memory(RangeConfig::default())?;
//!
//!     api.create_env("prod")?;
//!     api.add_cluster_to_env("prod", "web")?;
//!     api.add_host_to_cluster("prod", "web", "web001")?;
//!     api.add_host_to_cluster("prod", "web", "web002")?;
//!
//!     // Range expressions expand against the membership graph.
//!     let hosts = api.expand_range_expression("prod", "%web", None)?;
//!     assert_eq!(hosts, vec!["web001", "web002"]);
//!
//!     // Every version stays readable.
//!     let version = api.range_version()?;
//!     api.remove_host_from_cluster("prod", "web", "web002")?;
//!     assert_eq!(api.expand_range_expression("prod", "%web", Some(version))?.len(), 2);
//!     assert_eq!(api.expand_range_expression("prod", "%web", None)?.len(), 1);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod mq;
pub mod node;
pub mod record;
pub mod store;
pub mod value;
