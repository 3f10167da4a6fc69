//! Row fetching for one partition window.
//!
//! Every window query appends `$sort: {_id: 1}` to the caller's pipeline before
//! `$skip`/`$limit`, so consecutive windows see the same order and never overlap.

use super::planner::{Limit, PartitionDescriptor};
use super::schema::{ID_FIELD, ResolvedSchema};
use super::target::{ConnectionTarget, QuerySpec};
use super::traits::{DocumentStore, StoreConnector};
use crate::block::{Block, documents_to_block};
use crate::error::{Error, Result};
use bson::{Document, doc};
use std::sync::Arc;

/// The pipeline that reads exactly `desc`'s window of `query`'s result.
///
/// Appends the identifier sort, the window bounds, and for a declared schema the
/// column projection.
#[must_use]
pub fn window_pipeline(
    query: &QuerySpec,
    desc: &PartitionDescriptor,
    schema: &ResolvedSchema,
) -> Vec<Document> {
    let mut pipeline = query.pipeline.clone();
    pipeline.push(doc! { "$sort": { ID_FIELD: 1 } });
    if desc.skip > 0 {
        pipeline.push(doc! { "$skip": clamp_i64(desc.skip) });
    }
    if let Limit::Rows(n) = desc.limit {
        pipeline.push(doc! { "$limit": clamp_i64(n) });
    }
    if let Some(project) = schema.projection() {
        pipeline.push(project);
    }
    pipeline
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Fetch one window over an open connection and convert it to a block.
///
/// # Errors
/// Forwards store errors and conversion errors unchanged.
pub fn fetch_partition(
    store: &dyn DocumentStore,
    target: &ConnectionTarget,
    query: &QuerySpec,
    desc: &PartitionDescriptor,
    schema: &ResolvedSchema,
) -> Result<Block> {
    // A zero-row window cannot return anything; skip the round-trip.
    if desc.limit == Limit::Rows(0) {
        return documents_to_block(&[], schema.arrow());
    }
    let docs = store.aggregate(
        &target.database,
        &target.collection,
        &window_pipeline(query, desc, schema),
    )?;
    let block = documents_to_block(&docs, schema.arrow())?;
    tracing::debug!(
        %target,
        partition = desc.index,
        skip = desc.skip,
        rows = block.num_rows(),
        "fetched partition"
    );
    Ok(block)
}

/// Everything a read task needs, shared read-only by all partitions of one read.
///
/// Each [`read`](Self::read) opens its own connection.
#[derive(Clone)]
pub struct PartitionReader {
    connector: Arc<dyn StoreConnector>,
    target: Arc<ConnectionTarget>,
    query: Arc<QuerySpec>,
    schema: Arc<ResolvedSchema>,
}

impl PartitionReader {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        target: ConnectionTarget,
        query: QuerySpec,
        schema: ResolvedSchema,
    ) -> Self {
        Self {
            connector,
            target: Arc::new(target),
            query: Arc::new(query),
            schema: Arc::new(schema),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    /// Read one window.
    ///
    /// # Errors
    /// Connectivity and query errors pass through untouched; any other failure is
    /// wrapped in [`Error::Fetch`] with the partition index.
    pub fn read(&self, desc: &PartitionDescriptor) -> Result<Block> {
        let store = self.connector.connect(&self.target.uri)?;
        fetch_partition(store.as_ref(), &self.target, &self.query, desc, &self.schema).map_err(
            |e| match e {
                Error::Connectivity { .. } | Error::Query(_) => e,
                other => {
                    tracing::warn!(partition = desc.index, error = %other, "partition read failed");
                    Error::Fetch {
                        partition: desc.index,
                        source: Box::new(other),
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mongo::planner::split;
    use crate::io::mongo::{InMemoryConnector, InMemoryStore};
    use arrow::datatypes::DataType;

    const URI: &str = "mongodb://localhost:27017";

    #[test]
    fn window_pipeline_orders_then_bounds_then_projects() {
        let query = QuerySpec::match_all()
            .with_pipeline(vec![doc! { "$match": { "int_field": { "$lt": 3 } } }]);
        let schema = ResolvedSchema::declared([("int_field", DataType::Int32)]);
        let desc = PartitionDescriptor {
            index: 1,
            skip: 2,
            limit: Limit::Rows(2),
        };
        assert_eq!(
            window_pipeline(&query, &desc, &schema),
            vec![
                doc! { "$match": { "int_field": { "$lt": 3 } } },
                doc! { "$sort": { "_id": 1 } },
                doc! { "$skip": 2_i64 },
                doc! { "$limit": 2_i64 },
                doc! { "$project": { "int_field": 1, "_id": 0 } },
            ]
        );
    }

    #[test]
    fn first_and_last_windows_omit_unneeded_stages() {
        let schema = crate::io::mongo::schema::infer_schema(&[]);
        let only = PartitionDescriptor {
            index: 0,
            skip: 0,
            limit: Limit::Remainder,
        };
        assert_eq!(
            window_pipeline(&QuerySpec::match_all(), &only, &schema),
            vec![doc! { "$sort": { "_id": 1 } }]
        );
    }

    #[test]
    fn windows_tile_the_collection() -> Result<()> {
        let store = InMemoryStore::new(URI);
        store.seed("db", "c", (0..7).map(|i| doc! { "v": i }).collect());
        let reader = PartitionReader::new(
            Arc::new(InMemoryConnector::new().with_store(store)),
            ConnectionTarget::new(URI, "db", "c"),
            QuerySpec::match_all(),
            ResolvedSchema::declared([("v", DataType::Int32)]),
        );
        let mut seen = Vec::new();
        for desc in split(7, 3) {
            let block = reader.read(&desc)?;
            assert_eq!(block.num_columns(), 1);
            let col = block.column(0).as_any().downcast_ref::<arrow::array::Int32Array>();
            seen.extend(col.into_iter().flat_map(|a| a.values().iter().copied()));
        }
        assert_eq!(seen, (0..7).collect::<Vec<i32>>());
        Ok(())
    }

    #[test]
    fn query_errors_pass_through_unwrapped() {
        let store = InMemoryStore::new(URI);
        store.seed("db", "c", vec![doc! { "v": 1 }]);
        let reader = PartitionReader::new(
            Arc::new(InMemoryConnector::new().with_store(store)),
            ConnectionTarget::new(URI, "db", "c"),
            QuerySpec::match_all().with_pipeline(vec![doc! { "$bogus": {} }]),
            ResolvedSchema::declared([("v", DataType::Int32)]),
        );
        let desc = split(1, 1)[0];
        assert!(matches!(reader.read(&desc), Err(Error::Query(_))));
    }

    #[test]
    fn fetch_error_prints_its_cause_once() {
        let err = Error::Fetch {
            partition: 3,
            source: Box::new(Error::Conversion("bad column".to_string())),
        };
        assert_eq!(err.to_string(), "partition 3 failed to read");
        let chain = anyhow::Error::new(err);
        assert_eq!(
            format!("{chain:#}"),
            "partition 3 failed to read: block conversion failed: bad column"
        );
    }
}
