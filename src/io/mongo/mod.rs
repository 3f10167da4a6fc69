//! Parallel reads from and writes to a document store.
//!
//! ## Reading
//!
//! [`read_mongo`] turns a collection (optionally filtered by an aggregation pipeline)
//! into a lazy [`Dataset`] with one read task per partition. Before returning it:
//!
//! 1. validates the options,
//! 2. connects and checks that the database and collection exist,
//! 3. resolves the schema (declared, or inferred from a sample),
//! 4. plans the skip/limit windows.
//!
//! A missing target or a pipeline the store rejects therefore fails before any
//! partition is scheduled. A pipeline whose output has no unique `_id` is read as a
//! single window. Every read task
//! opens its own connection, fetches its `_id`-ordered window, and converts it into a
//! block with exactly the resolved columns.
//!
//! ```
//! use std::sync::Arc;
//! use arrow::datatypes::DataType;
//! use bson::doc;
//! use ironbeam_mongo::DataContext;
//! use ironbeam_mongo::io::mongo::{InMemoryConnector, InMemoryStore, ReadMongoOptions, read_mongo};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = InMemoryStore::new("mongodb://localhost:27017");
//! let docs = (0..5).map(|i| doc! { "float_field": 2.0 * f64::from(i), "int_field": i });
//! store.seed("db", "coll", docs.collect());
//! let connector = Arc::new(InMemoryConnector::new().with_store(store));
//!
//! let ds = read_mongo(
//!     connector,
//!     &DataContext::default(),
//!     ReadMongoOptions::new("mongodb://localhost:27017", "db", "coll")
//!         .with_fields([("float_field", DataType::Float64), ("int_field", DataType::Int32)])
//!         .with_override_num_blocks(2),
//! )?;
//! assert_eq!(ds.block_num_rows()?, vec![3, 2]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! [`write_mongo`] inserts each block of a [`MaterializedDataset`] with its own bulk
//! insert. The target must already exist. See [`write`] for the failure model.

pub mod eval;
pub mod fake;
pub mod fetch;
pub mod options;
pub mod planner;
pub mod schema;
pub mod target;
pub mod traits;
pub mod validate;
pub mod write;

pub use fake::{InMemoryConnector, InMemoryStore, StatsSnapshot};
pub use fetch::{PartitionReader, fetch_partition, window_pipeline};
pub use options::{ReadMongoOptions, WriteMongoOptions};
pub use planner::{
    CountBasis, Limit, PartitionDescriptor, PartitionPlan, PartitionPlanner, split,
};
pub use schema::{ResolvedSchema, SchemaResolver, SchemaSource, infer_schema};
pub use target::{ConnectionTarget, QuerySpec};
pub use traits::{DocumentStore, RowCountSource, StoreConnector};
pub use validate::validate_target;
pub use write::{BulkWriter, WriteSummary, summarize, write_block};

use crate::config::DataContext;
use crate::dataset::{Dataset, MaterializedDataset, ReadTask};
use crate::runner::Runner;
use anyhow::Result;
use std::sync::Arc;

/// Plan a parallel read of a collection.
///
/// Returns a lazy dataset; no documents are fetched until it is materialized. When no
/// block count is given, `ctx.default_parallelism` blocks are planned regardless of the
/// collection size.
///
/// # Errors
/// - [`Error::Configuration`](crate::Error::Configuration) for invalid options or a
///   missing database or collection,
/// - [`Error::Connectivity`](crate::Error::Connectivity) if the store cannot be reached,
/// - [`Error::Query`](crate::Error::Query) if the store rejects the pipeline. Any
///   pipeline stages are run once against a sample while planning, so this surfaces
///   here rather than from the read tasks.
pub fn read_mongo(
    connector: Arc<dyn StoreConnector>,
    ctx: &DataContext,
    options: ReadMongoOptions,
) -> Result<Dataset> {
    options.validate()?;
    let target = options.target();
    let query = options.query();

    let store = connector.connect(&target.uri)?;
    validate_target(store.as_ref(), &target)?;

    let schema = SchemaResolver::new(ctx.schema_sample_size).resolve(
        store.as_ref(),
        &target,
        &query,
        options.schema.clone(),
    )?;

    let basis = options.count_basis.unwrap_or(ctx.count_basis);
    let mut planner = PartitionPlanner::new(ctx.default_parallelism, basis);
    if !schema.id_ordered() {
        planner = planner.single_window();
    }
    let plan = planner.plan(store.as_ref(), &target, &query)?;
    tracing::info!(
        collection = %target,
        partitions = plan.len(),
        estimated_rows = plan.counted_rows,
        schema = %schema,
        "planned read"
    );

    let advertised = schema.known();
    let reader = PartitionReader::new(connector, target, query, schema);
    let tasks = plan
        .descriptors
        .iter()
        .zip(plan.expected_rows())
        .map(|(desc, rows)| {
            let reader = reader.clone();
            let desc = *desc;
            ReadTask::new(
                desc.index,
                Some(rows),
                Arc::new(move || -> Result<crate::block::Block> { Ok(reader.read(&desc)?) }),
            )
        })
        .collect();

    Ok(Dataset::from_tasks(tasks, advertised, Runner::new(ctx.exec_mode)))
}

/// Insert every block of `dataset` into an existing collection, in parallel.
///
/// # Errors
/// - [`Error::Configuration`](crate::Error::Configuration) if the target does not exist
///   (nothing is inserted),
/// - [`Error::Connectivity`](crate::Error::Connectivity) if the store cannot be reached,
/// - [`Error::Write`](crate::Error::Write) if any block failed; blocks that committed
///   stay committed.
pub fn write_mongo(
    dataset: &MaterializedDataset,
    connector: Arc<dyn StoreConnector>,
    ctx: &DataContext,
    options: WriteMongoOptions,
) -> Result<WriteSummary> {
    options.validate()?;
    let writer = BulkWriter::new(connector, options.target());
    Ok(writer.write_all(&Runner::new(ctx.exec_mode), dataset.blocks())?)
}
