//! A partition coordinator for single-node search engines.
//!
//! `shardbridge` turns N independent engine instances into one logical, horizontally sharded
//! database. Commands are plain engine command lines; loads are split across shards by row
//! identity, selects are broadcast and merged in shard order, and every `_id` the caller sees
//! is a global row ID (`global = (local - 1) * N + shard + 1`).
//!
//! An in-memory analytical database sits beside the shards. `snapshot` copies a column into
//! it, and `select` options prefixed with `analytics_` run a filter/sort stage there, either
//! over the snapshot alone or over the merged, globally identified engine hits.
//!
//! # Quickstart
//! ```no_run
//! use std::sync::Arc;
//!
//! use shardbridge::gateway::memory::MemoryConnector;
//! use shardbridge::Coordinator;
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = Coordinator::builder(Arc::new(MemoryConnector::new(3)))
//!         .shards(3)
//!         .build()?;
//!
//!     db.execute("table_create Docs TABLE_NO_KEY")?;
//!     db.execute("column_create Docs title COLUMN_SCALAR ShortText")?;
//!     db.execute(r#"load --table Docs --columns _id,title --values '[[1,"a"],[2,"b"],[3,"c"]]'"#)?;
//!
//!     let merged = db.query("select Docs --output_columns _id,title")?;
//!     println!("{}", String::from_utf8_lossy(&merged));
//!
//!     db.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//! - `CoordinatorConfig.shards`: number of shards, fixed at open.
//! - `CoordinatorConfig.parallelism`: fan-out parallelism (defaults to logical cores, or
//!   `SHARDBRIDGE_PARALLELISM`); `1` runs shards one at a time.
//! - `CoordinatorConfig.routing_seed`: makes keyless record placement reproducible.
//! - `CoordinatorConfig.runtime`: engine init/fin hooks, run around the first and last
//!   shard gateway.
//!
//! # Engines
//! - `gateway::tcp`: framed TCP gateway to a remote engine (`shardbridge serve`).
//! - `gateway::memory`: in-process engine speaking the same command subset.

pub mod analytics;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
#[doc(hidden)]
pub mod executor;
pub mod gateway;
#[doc(hidden)]
pub mod merge;
pub mod router;
pub mod row_id;
pub mod runtime;
#[doc(hidden)]
pub mod shard;
pub mod value;

pub use config::{CoordinatorBuilder, CoordinatorConfig};
pub use coordinator::{Coordinator, Response};
pub use error::{CoordError, Result, ShardFailure};
pub use gateway::{EngineGateway, ShardConnector};
pub use row_id::RowIdCodec;
pub use runtime::{EngineRuntime, RuntimeHooks};
pub use value::{DataType, Scalar, SelectResult, TypedColumn};
