use anyhow::Result;
use arrow::datatypes::DataType;
use bson::doc;
use ironbeam_mongo::io::mongo::{InMemoryConnector, InMemoryStore};
use ironbeam_mongo::testing::*;
use ironbeam_mongo::{
    ConfigurationError, CountBasis, DataContext, Error, ExecMode, ReadMongoOptions, read_mongo,
};
use std::sync::Arc;

const DB: &str = "test_db";
const COLL: &str = "test_collection";

fn opts() -> ReadMongoOptions {
    ReadMongoOptions::new(TEST_URI, DB, COLL)
}

fn five_rows() -> (InMemoryStore, Arc<dyn ironbeam_mongo::StoreConnector>) {
    seeded_connector(DB, COLL, numeric_docs(0..5))
}

#[test]
fn unreachable_uri_is_a_connectivity_error() {
    let (_, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        ReadMongoOptions::new(UNREACHABLE_URI, DB, COLL),
    )
    .unwrap_err();
    assert_connectivity_error(&err);
}

#[test]
fn store_outage_is_not_reported_as_missing_collection() {
    let (store, connector) = five_rows();
    store.set_unreachable(true);
    let err = read_mongo(connector, &DataContext::default(), opts()).unwrap_err();
    assert_connectivity_error(&err);
}

#[test]
fn missing_database_fails_before_any_fetch() {
    let (store, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        ReadMongoOptions::new(TEST_URI, "nonexistent_db", COLL),
    )
    .unwrap_err();
    assert!(matches!(
        assert_configuration_error(&err),
        ConfigurationError::DatabaseNotFound { .. }
    ));
    let stats = store.stats();
    assert_eq!(stats.aggregate_calls, 0);
    assert_eq!(stats.estimated_count_calls + stats.exact_count_calls, 0);
}

#[test]
fn missing_collection_fails_before_any_fetch() {
    let (store, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        ReadMongoOptions::new(TEST_URI, DB, "nonexistent_collection"),
    )
    .unwrap_err();
    assert!(matches!(
        assert_configuration_error(&err),
        ConfigurationError::CollectionNotFound { .. }
    ));
    assert_eq!(store.stats().aggregate_calls, 0);
}

#[test]
fn declared_schema_projects_and_splits_evenly() -> Result<()> {
    let (_, connector) = five_rows();
    let ds = read_mongo(
        connector,
        &DataContext::default(),
        opts()
            .with_schema(numeric_schema())
            .with_override_num_blocks(2),
    )?;
    assert_eq!(
        ds.to_string(),
        "Dataset(num_rows=5, schema={float_field: double, int_field: int32})"
    );

    let mat = ds.materialize()?;
    assert_eq!(mat.block_num_rows(), vec![3, 2]);
    assert_eq!(
        mat.to_string(),
        "MaterializedDataset(\n   num_blocks=2,\n   num_rows=5,\n   schema={float_field: double, int_field: int32}\n)"
    );
    assert_disjoint_cover(&mat, "int_field", &[0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn inferred_schema_leads_with_id() -> Result<()> {
    let (_, connector) = five_rows();
    let ds = read_mongo(
        connector,
        &DataContext::default(),
        opts().with_override_num_blocks(2),
    )?;
    let schema = ds.schema().expect("schema is known after sampling");
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["_id", "float_field", "int_field"]);

    let mat = ds.materialize()?;
    assert_eq!(mat.count(), 5);
    let docs = mat.drop_columns(&["_id"])?.to_documents()?;
    assert_eq!(docs, numeric_docs(0..5));
    Ok(())
}

#[test]
fn filtered_read_covers_matches_once() -> Result<()> {
    let (_, connector) = five_rows();
    let pipeline = vec![doc! { "$match": { "int_field": { "$gte": 0, "$lt": 3 } } }];

    let exact = read_mongo(
        Arc::clone(&connector),
        &DataContext::default(),
        opts()
            .with_pipeline(pipeline.clone())
            .with_schema(numeric_schema())
            .with_override_num_blocks(2)
            .with_count_basis(CountBasis::Exact),
    )?
    .materialize()?;
    assert_eq!(exact.block_num_rows(), vec![2, 1]);
    assert_disjoint_cover(&exact, "int_field", &[0, 1, 2]);

    // Sized from the unfiltered estimate: still complete, just unbalanced.
    let planned = read_mongo(
        connector,
        &DataContext::default(),
        opts()
            .with_pipeline(pipeline)
            .with_schema(numeric_schema())
            .with_override_num_blocks(2),
    )?;
    assert_eq!(planned.estimated_rows(), Some(5));
    assert_eq!(planned.count()?, 3);
    let estimated = planned.materialize()?;
    assert_eq!(estimated.block_num_rows(), vec![3, 0]);
    assert_disjoint_cover(&estimated, "int_field", &[0, 1, 2]);
    Ok(())
}

#[test]
fn auto_tune_uses_default_parallelism() -> Result<()> {
    let (store, connector) = five_rows();
    let ds = read_mongo(
        connector,
        &DataContext::default(),
        opts().with_schema(numeric_schema()),
    )?;
    assert_eq!(ds.num_blocks(), 200);
    assert_eq!(store.stats().exact_count_calls, 0);

    let mat = ds.materialize()?;
    assert_eq!(mat.num_blocks(), 200);
    assert_eq!(mat.count(), 5);
    assert_disjoint_cover(&mat, "int_field", &[0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn default_parallelism_is_configurable() -> Result<()> {
    let (_, connector) = five_rows();
    let ctx =
        DataContext::from_json_str(r#"{"default_parallelism": 3, "exec_mode": "sequential"}"#)?;
    let ds = read_mongo(connector, &ctx, opts())?;
    assert_eq!(ds.block_num_rows()?, vec![2, 2, 1]);
    Ok(())
}

#[test]
fn oversized_request_yields_empty_trailing_blocks() -> Result<()> {
    let (_, connector) = five_rows();
    let ctx = DataContext::default().with_exec_mode(ExecMode::Parallel { threads: Some(4) });
    let mat = read_mongo(
        Arc::clone(&connector),
        &ctx,
        opts().with_override_num_blocks(1000),
    )?
    .materialize()?;
    assert_eq!(mat.num_blocks(), 1000);
    assert_eq!(mat.count(), 5);
    assert_eq!(mat.block_num_rows().iter().filter(|&&n| n > 0).count(), 5);

    let capped = read_mongo(
        connector,
        &ctx.with_count_basis(CountBasis::Exact),
        opts().with_override_num_blocks(1000),
    )?;
    assert_eq!(capped.num_blocks(), 5);
    assert_eq!(capped.block_num_rows()?, vec![1; 5]);
    Ok(())
}

#[test]
fn empty_collection_reads_as_unknown_schema() -> Result<()> {
    let (_, connector) = seeded_connector(DB, COLL, vec![]);
    let ds = read_mongo(connector, &DataContext::default(), opts())?;
    assert_eq!(ds.schema(), None);
    assert_eq!(ds.to_string(), "Dataset(num_rows=0, schema=Unknown schema)");
    assert_eq!(ds.count()?, 0);
    Ok(())
}

#[test]
fn each_read_task_opens_its_own_connection() -> Result<()> {
    let store = InMemoryStore::new(TEST_URI);
    store.seed(DB, COLL, numeric_docs(0..4));
    let connector = Arc::new(InMemoryConnector::new().with_store(store));
    let ds = read_mongo(
        connector.clone(),
        &DataContext::default(),
        opts().with_override_num_blocks(4),
    )?;
    assert_eq!(connector.connections(), 1);
    ds.materialize()?;
    assert_eq!(connector.connections(), 5);
    Ok(())
}

#[test]
fn malformed_pipeline_is_a_query_error() {
    let (_, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        opts().with_pipeline(vec![doc! { "$match": { "int_field": { "$between": [0, 3] } } }]),
    )
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Query(_))));
}

#[test]
fn zero_blocks_is_rejected() {
    let (_, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        opts().with_override_num_blocks(0),
    )
    .unwrap_err();
    assert!(matches!(
        assert_configuration_error(&err),
        ConfigurationError::InvalidOption(_)
    ));
}

#[test]
fn declared_subset_of_fields_only_fetches_those() -> Result<()> {
    let (_, connector) = five_rows();
    let mat = read_mongo(
        connector,
        &DataContext::default(),
        opts()
            .with_fields([("int_field", DataType::Int32)])
            .with_override_num_blocks(1),
    )?
    .materialize()?;
    assert_eq!(mat.schema().fields().len(), 1);
    assert_eq!(column_i64(&mat, "int_field"), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn malformed_pipeline_with_declared_schema_fails_while_planning() {
    let (store, connector) = five_rows();
    let err = read_mongo(
        connector,
        &DataContext::default(),
        opts()
            .with_schema(numeric_schema())
            .with_pipeline(vec![doc! { "$match": { "int_field": { "$between": [0, 3] } } }]),
    )
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Query(_))));
    assert!(store.stats().aggregate_calls <= 1);
}

#[test]
fn pipeline_dropping_id_is_read_as_one_block() -> Result<()> {
    let (_, connector) = five_rows();
    let drop_id = vec![doc! { "$project": { "_id": 0 } }];

    let inferred = read_mongo(
        Arc::clone(&connector),
        &DataContext::default(),
        opts()
            .with_pipeline(drop_id.clone())
            .with_override_num_blocks(4),
    )?;
    assert_eq!(inferred.num_blocks(), 1);
    let mat = inferred.materialize()?;
    assert_eq!(mat.schema().fields().len(), 2);
    assert_disjoint_cover(&mat, "int_field", &[0, 1, 2, 3, 4]);

    let declared = read_mongo(
        connector,
        &DataContext::default().with_count_basis(CountBasis::Exact),
        opts()
            .with_schema(numeric_schema())
            .with_pipeline(drop_id)
            .with_override_num_blocks(4),
    )?
    .materialize()?;
    assert_eq!(declared.block_num_rows(), vec![5]);
    Ok(())
}
