//! Parallel bulk writes, one insert per existing block.
//!
//! The target is validated once before any task starts, so a missing database or
//! collection fails the call with zero documents inserted. After that every block is
//! written by its own task over its own connection. A failed block does not stop the
//! others and nothing is rolled back: the call reports a [`WriteFailure`] that lists the
//! failed partitions and how many documents did commit.

use super::target::ConnectionTarget;
use super::traits::StoreConnector;
use super::validate::validate_target;
use crate::block::{Block, block_to_documents};
use crate::error::{Error, PartitionFailure, Result, WriteFailure};
use crate::runner::{Runner, Task};
use std::sync::Arc;

/// Outcome of a successful write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Documents inserted by each block, in block order. Empty blocks count as zero.
    pub inserted_per_partition: Vec<usize>,
    pub total_inserted: usize,
}

/// Insert one block's rows as a single bulk insert.
///
/// # Errors
/// Forwards connection, conversion, and insert errors.
pub fn write_block(
    connector: &dyn StoreConnector,
    target: &ConnectionTarget,
    partition: usize,
    block: &Block,
) -> Result<usize> {
    if block.num_rows() == 0 {
        return Ok(0);
    }
    let docs = block_to_documents(block)?;
    let store = connector.connect(&target.uri)?;
    let inserted = store.insert_many(&target.database, &target.collection, docs)?;
    tracing::debug!(%target, partition, inserted, "partition written");
    Ok(inserted)
}

/// Coordinates the per-block insert tasks of one write call.
#[derive(Clone)]
pub struct BulkWriter {
    connector: Arc<dyn StoreConnector>,
    target: Arc<ConnectionTarget>,
}

impl BulkWriter {
    pub fn new(connector: Arc<dyn StoreConnector>, target: ConnectionTarget) -> Self {
        Self {
            connector,
            target: Arc::new(target),
        }
    }

    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The insert task for one block.
    #[must_use]
    pub fn task(&self, partition: usize, block: Block) -> Task<usize> {
        let connector = Arc::clone(&self.connector);
        let target = Arc::clone(&self.target);
        Box::new(move || -> anyhow::Result<usize> {
            Ok(write_block(connector.as_ref(), &target, partition, &block)?)
        })
    }

    /// Validate the target, then insert every block on `runner`.
    ///
    /// # Errors
    /// Returns a configuration or connectivity error before any insert, or
    /// [`Error::Write`] once all tasks have finished if any of them failed.
    pub fn write_all(&self, runner: &Runner, blocks: &[Block]) -> Result<WriteSummary> {
        let store = self.connector.connect(&self.target.uri)?;
        validate_target(store.as_ref(), &self.target)?;

        let tasks: Vec<Task<usize>> = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| self.task(i, block.clone()))
            .collect();
        tracing::info!(collection = %self.target, partitions = tasks.len(), "starting bulk write");
        let summary = summarize(runner.run_all(tasks))?;
        tracing::info!(
            collection = %self.target,
            inserted = summary.total_inserted,
            "bulk write complete"
        );
        Ok(summary)
    }
}

/// Fold per-partition outcomes into a summary or a [`WriteFailure`].
///
/// Partial progress reported by a failed insert counts toward the committed total.
///
/// # Errors
/// Returns [`Error::Write`] if any outcome is an error.
pub fn summarize(outcomes: Vec<anyhow::Result<usize>>) -> Result<WriteSummary> {
    let partitions = outcomes.len();
    let mut inserted_per_partition = Vec::with_capacity(partitions);
    let mut failed = Vec::new();
    let mut committed = 0usize;

    for (partition, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(n) => {
                committed += n;
                inserted_per_partition.push(n);
            }
            Err(e) => {
                let partial = match e.downcast_ref::<Error>() {
                    Some(Error::Insert { inserted, .. }) => *inserted,
                    _ => 0,
                };
                committed += partial;
                inserted_per_partition.push(partial);
                tracing::warn!(partition, error = %e, "partition write failed");
                failed.push(PartitionFailure {
                    partition,
                    message: format!("{e:#}"),
                });
            }
        }
    }

    if failed.is_empty() {
        Ok(WriteSummary {
            inserted_per_partition,
            total_inserted: committed,
        })
    } else {
        Err(WriteFailure {
            partitions,
            inserted: committed,
            failed,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::documents_to_block;
    use crate::error::ConfigurationError;
    use crate::io::mongo::{InMemoryConnector, InMemoryStore};
    use crate::runner::ExecMode;
    use arrow::datatypes::{DataType, Field, Schema};
    use bson::doc;

    const URI: &str = "mongodb://localhost:27017";

    fn blocks(sizes: &[i32]) -> Vec<Block> {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
        let mut next = 0;
        sizes
            .iter()
            .map(|&n| {
                let docs: Vec<_> = (next..next + n).map(|v| doc! { "v": v }).collect();
                next += n;
                documents_to_block(&docs, &schema).unwrap()
            })
            .collect()
    }

    fn writer(store: &InMemoryStore, db: &str, coll: &str) -> BulkWriter {
        BulkWriter::new(
            Arc::new(InMemoryConnector::new().with_store(store.clone())),
            ConnectionTarget::new(URI, db, coll),
        )
    }

    #[test]
    fn every_block_is_inserted_once() -> Result<()> {
        let store = InMemoryStore::new(URI);
        store.create_collection("db", "c");
        let summary =
            writer(&store, "db", "c").write_all(&Runner::default(), &blocks(&[3, 0, 2]))?;
        assert_eq!(summary.inserted_per_partition, vec![3, 0, 2]);
        assert_eq!(summary.total_inserted, 5);
        assert_eq!(store.documents("db", "c").len(), 5);
        assert_eq!(store.stats().insert_calls, 2);
        Ok(())
    }

    #[test]
    fn missing_target_inserts_nothing() {
        let store = InMemoryStore::new(URI);
        store.create_collection("db", "c");
        let err = writer(&store, "db", "missing")
            .write_all(&Runner::default(), &blocks(&[2]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::CollectionNotFound { .. })
        ));
        assert_eq!(store.stats().insert_calls, 0);
        assert!(store.documents("db", "missing").is_empty());
    }

    #[test]
    fn failed_partition_does_not_roll_back_the_others() {
        let store = InMemoryStore::new(URI);
        store.create_collection("db", "c");
        store.reject_inserts_where(doc! { "v": 4 });
        let runner = Runner::new(ExecMode::Sequential);
        let err = writer(&store, "db", "c")
            .write_all(&runner, &blocks(&[2, 2, 2]))
            .unwrap_err();
        let Error::Write(failure) = err else {
            panic!("expected a write failure");
        };
        assert_eq!(failure.partitions, 3);
        assert_eq!(failure.inserted, 4);
        assert_eq!(failure.failed.len(), 1);
        assert_eq!(failure.failed[0].partition, 2);
        assert_eq!(store.documents("db", "c").len(), 4);
    }

    #[test]
    fn partial_insert_counts_are_kept() {
        let outcomes: Vec<anyhow::Result<usize>> = vec![
            Ok(5),
            Err(Error::Insert {
                inserted: 2,
                message: "network reset".into(),
            }
            .into()),
        ];
        let Err(Error::Write(failure)) = summarize(outcomes) else {
            panic!("expected a write failure");
        };
        assert_eq!(failure.inserted, 7);
        assert!(
            failure
                .to_string()
                .starts_with("1 of 2 partition writes failed (7 documents committed)")
        );
    }
}
