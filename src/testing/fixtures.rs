//! Pre-built stores and documents for common testing scenarios.

use crate::io::mongo::{InMemoryConnector, InMemoryStore, ResolvedSchema, StoreConnector};
use arrow::datatypes::DataType;
use bson::{Document, doc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// URI the fixtures register their stores under.
pub const TEST_URI: &str = "mongodb://localhost:27017";

/// A URI no fixture store answers on.
pub const UNREACHABLE_URI: &str = "nonexistent-uri";

/// Typed form of one [`numeric_docs`] document, for `from_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRow {
    pub float_field: f64,
    pub int_field: i32,
}

/// `{float_field: 2.0 * v, int_field: v}` for each `v` in `values`.
///
/// # Example
///
/// ```
/// use ironbeam_mongo::testing::numeric_docs;
///
/// let docs = numeric_docs(0..3);
/// assert_eq!(docs[2].get_f64("float_field").unwrap(), 4.0);
/// ```
#[must_use]
pub fn numeric_docs(values: Range<i32>) -> Vec<Document> {
    values
        .map(|v| doc! { "float_field": 2.0 * f64::from(v), "int_field": v })
        .collect()
}

/// The same rows as [`numeric_docs`], typed.
#[must_use]
pub fn numeric_rows(values: Range<i32>) -> Vec<NumericRow> {
    values
        .map(|v| NumericRow {
            float_field: 2.0 * f64::from(v),
            int_field: v,
        })
        .collect()
}

/// Declared schema for the [`numeric_docs`] fields, without `_id`.
#[must_use]
pub fn numeric_schema() -> ResolvedSchema {
    ResolvedSchema::declared([
        ("float_field", DataType::Float64),
        ("int_field", DataType::Int32),
    ])
}

/// A store at [`TEST_URI`] holding `docs` in `database.collection`, and a connector
/// that knows only that store.
#[must_use]
pub fn seeded_connector(
    database: &str,
    collection: &str,
    docs: Vec<Document>,
) -> (InMemoryStore, Arc<dyn StoreConnector>) {
    let store = InMemoryStore::new(TEST_URI);
    store.create_collection(database, collection);
    store.seed(database, collection, docs);
    let connector = Arc::new(InMemoryConnector::new().with_store(store.clone()));
    (store, connector)
}
