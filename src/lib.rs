//! # ironbeam-mongo
//!
//! A **parallel connector** between a document database and block-partitioned columnar
//! datasets. Reads split a collection (or the result of an aggregation pipeline) into
//! independently fetchable skip/limit windows; writes insert every block of a dataset
//! with its own bulk insert.
//!
//! ## Key Features
//!
//! - **Partition planning** - N contiguous `_id`-ordered windows that cover the result
//!   exactly once, sized from an estimated or exact count
//! - **Schema resolution** - declared schemas double as column projections; otherwise the
//!   schema is inferred from a deterministic sample
//! - **Fail-fast validation** - missing databases and collections are reported before any
//!   partition task is scheduled, for reads and writes alike
//! - **Parallel bulk writes** - one task per block, no cross-block rollback, a per-block
//!   summary of what committed
//! - **Sequential and parallel execution** - tasks run in-process or on a rayon pool
//! - **In-memory store** - every boundary trait has an in-memory implementation for tests
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use bson::doc;
//! use ironbeam_mongo::*;
//! use ironbeam_mongo::io::mongo::{InMemoryConnector, InMemoryStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = InMemoryStore::new("mongodb://localhost:27017");
//! store.seed("db", "events", (0..10).map(|i| doc! { "kind": "click", "n": i }).collect());
//! let connector: Arc<dyn StoreConnector> = Arc::new(InMemoryConnector::new().with_store(store));
//! let ctx = DataContext::default().with_default_parallelism(4);
//!
//! // Plan a filtered read; nothing is fetched yet.
//! let ds = read_mongo(
//!     Arc::clone(&connector),
//!     &ctx,
//!     ReadMongoOptions::new("mongodb://localhost:27017", "db", "events")
//!         .with_pipeline(vec![doc! { "$match": { "n": { "$lt": 6 } } }])
//!         .with_count_basis(CountBasis::Exact),
//! )?;
//! let blocks = ds.materialize()?;
//! assert_eq!(blocks.num_rows(), 6);
//!
//! // Append a range back to the same collection.
//! let summary = MaterializedDataset::range(2, 1)?.write_mongo(
//!     connector,
//!     &ctx,
//!     WriteMongoOptions::new("mongodb://localhost:27017", "db", "events"),
//! )?;
//! assert_eq!(summary.total_inserted, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Datasets
//!
//! A [`Dataset`] is a list of read tasks plus the schema and row estimate known at
//! planning time. [`Dataset::materialize`] runs the tasks on a [`Runner`] and returns a
//! [`MaterializedDataset`] whose blocks are Arrow record batches, one per task, in
//! task order.
//!
//! ### Count basis
//!
//! [`CountBasis::Estimated`] (the default) sizes windows from the collection's metadata
//! count and always plans the requested number of blocks; some may be empty.
//! [`CountBasis::Exact`] counts the pipeline's result and plans at most that many blocks.
//!
//! The metadata count ignores any filter in the pipeline. Under the estimated basis,
//! the row count a [`Dataset`] reports before reading ([`Dataset::estimated_rows`] and
//! its `Display`) is the collection's size, not the filtered result's: a filter matching
//! 3 of 5 documents shows `num_rows=5` and materializes two blocks as `[3, 0]`.
//! [`Dataset::count`], [`Dataset::block_num_rows`] and every [`MaterializedDataset`]
//! count read the data and are exact.
//!
//! ### Errors
//!
//! Entry points return `anyhow::Result`. The underlying [`Error`] can be recovered with
//! `downcast_ref` to tell configuration, connectivity, query, and write failures apart.
//!
//! ## Modules
//!
//! - [`io::mongo`] - entry points, store traits, planner, schema resolver, writer
//! - [`dataset`] - lazy and materialized datasets
//! - [`block`] - document/block conversion
//! - [`config`] - [`DataContext`]
//! - [`runner`] - task execution
//! - [`testing`] - fixtures and assertions for downstream tests

pub mod block;
pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod runner;
pub mod testing;

pub use block::Block;
pub use config::DataContext;
pub use dataset::{Dataset, MaterializedDataset, ReadTask};
pub use error::{ConfigurationError, Error, WriteFailure};
pub use io::mongo::{
    CountBasis, ReadMongoOptions, ResolvedSchema, StoreConnector, WriteMongoOptions, WriteSummary,
    read_mongo, write_mongo,
};
pub use runner::{ExecMode, Runner};
