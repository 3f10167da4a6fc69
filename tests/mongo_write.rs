use anyhow::Result;
use bson::doc;
use ironbeam_mongo::io::mongo::{InMemoryConnector, InMemoryStore};
use ironbeam_mongo::testing::*;
use ironbeam_mongo::{
    ConfigurationError, DataContext, Error, ExecMode, MaterializedDataset, ReadMongoOptions,
    WriteMongoOptions, read_mongo,
};
use std::sync::Arc;

const DB: &str = "test_db";
const COLL: &str = "test_collection";

#[test]
fn write_then_read_recovers_inserted_rows() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, numeric_docs(0..5));
    // Sequential so the new rows get ids in block order.
    let ctx = DataContext::default().with_exec_mode(ExecMode::Sequential);

    let new_rows = MaterializedDataset::from_documents(&numeric_docs(5..7), 2)?;
    let summary = new_rows.write_mongo(
        Arc::clone(&connector),
        &ctx,
        WriteMongoOptions::new(TEST_URI, DB, COLL),
    )?;
    assert_eq!(summary.inserted_per_partition, vec![1, 1]);
    assert_eq!(summary.total_inserted, 2);
    assert_eq!(store.stats().insert_calls, 2);

    let back = read_mongo(
        connector,
        &ctx,
        ReadMongoOptions::new(TEST_URI, DB, COLL)
            .with_schema(numeric_schema())
            .with_override_num_blocks(3),
    )?
    .materialize()?;
    assert_disjoint_cover(&back, "int_field", &[0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(back.to_documents()?, numeric_docs(0..7));
    Ok(())
}

#[test]
fn read_dataset_can_be_written_to_another_collection() -> Result<()> {
    let store = InMemoryStore::new(TEST_URI);
    store.seed(DB, COLL, numeric_docs(0..5));
    store.create_collection(DB, "copy");
    let connector = Arc::new(InMemoryConnector::new().with_store(store.clone()));
    let ctx = DataContext::default().with_exec_mode(ExecMode::Sequential);

    let summary = read_mongo(
        connector.clone(),
        &ctx,
        ReadMongoOptions::new(TEST_URI, DB, COLL).with_override_num_blocks(2),
    )?
    .write_mongo(connector, &ctx, WriteMongoOptions::new(TEST_URI, DB, "copy"))?;
    assert_eq!(summary.total_inserted, 5);
    // The inferred `_id` column is written back as ObjectIds.
    assert_eq!(store.documents(DB, "copy"), store.documents(DB, COLL));
    Ok(())
}

#[test]
fn missing_database_inserts_nothing() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, numeric_docs(0..5));
    let err = MaterializedDataset::range(10, 2)?
        .write_mongo(
            connector,
            &DataContext::default(),
            WriteMongoOptions::new(TEST_URI, "nonexistent_db", COLL),
        )
        .unwrap_err();
    assert!(matches!(
        assert_configuration_error(&err),
        ConfigurationError::DatabaseNotFound { .. }
    ));
    assert_eq!(store.stats().insert_calls, 0);
    assert!(store.documents("nonexistent_db", COLL).is_empty());
    Ok(())
}

#[test]
fn missing_collection_inserts_nothing() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, numeric_docs(0..5));
    let err = MaterializedDataset::range(10, 2)?
        .write_mongo(
            connector,
            &DataContext::default(),
            WriteMongoOptions::new(TEST_URI, DB, "nonexistent_collection"),
        )
        .unwrap_err();
    assert!(matches!(
        assert_configuration_error(&err),
        ConfigurationError::CollectionNotFound { .. }
    ));
    assert_eq!(store.stats().insert_calls, 0);
    Ok(())
}

#[test]
fn unreachable_store_is_a_connectivity_error() -> Result<()> {
    let (_, connector) = seeded_connector(DB, COLL, vec![]);
    let err = MaterializedDataset::range(3, 1)?
        .write_mongo(
            connector,
            &DataContext::default(),
            WriteMongoOptions::new(UNREACHABLE_URI, DB, COLL),
        )
        .unwrap_err();
    assert_connectivity_error(&err);
    Ok(())
}

#[test]
fn failed_block_leaves_other_blocks_committed() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, vec![]);
    store.reject_inserts_where(doc! { "id": 7 });

    let err = MaterializedDataset::range(10, 3)?
        .write_mongo(
            connector,
            &DataContext::default(),
            WriteMongoOptions::new(TEST_URI, DB, COLL),
        )
        .unwrap_err();
    let Some(Error::Write(failure)) = err.downcast_ref::<Error>() else {
        panic!("expected a write failure, got {err:#}");
    };
    // Blocks are [0..4), [4..8), [8..10); the middle one holds id 7.
    assert_eq!(failure.partitions, 3);
    assert_eq!(failure.failed.len(), 1);
    assert_eq!(failure.failed[0].partition, 1);
    assert_eq!(failure.inserted, 6);

    let mut ids: Vec<i64> = store
        .documents(DB, COLL)
        .iter()
        .map(|d| d.get_i64("id"))
        .collect::<std::result::Result<_, _>>()?;
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 8, 9]);
    Ok(())
}

#[test]
fn empty_blocks_are_skipped() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, vec![]);
    let ds = MaterializedDataset::range(0, 4)?;
    let summary = ds.write_mongo(
        connector,
        &DataContext::default(),
        WriteMongoOptions::new(TEST_URI, DB, COLL),
    )?;
    assert_eq!(summary.total_inserted, 0);
    assert_eq!(store.stats().insert_calls, 0);
    Ok(())
}

#[cfg(feature = "typed-items")]
#[test]
fn typed_items_write_like_documents() -> Result<()> {
    let (store, connector) = seeded_connector(DB, COLL, vec![]);
    let ds = MaterializedDataset::from_items(&numeric_rows(0..4), 2)?;
    ds.write_mongo(
        connector,
        &DataContext::default().with_exec_mode(ExecMode::Sequential),
        WriteMongoOptions::new(TEST_URI, DB, COLL),
    )?;
    let stored: Vec<_> = store
        .documents(DB, COLL)
        .into_iter()
        .map(|mut d| {
            d.remove("_id");
            d
        })
        .collect();
    assert_eq!(stored, numeric_docs(0..4));
    Ok(())
}
