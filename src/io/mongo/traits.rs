//! Boundary traits for the document-store driver.
//!
//! Transport, authentication, cursor management and query execution all live behind
//! these traits. Every method is a blocking round-trip; callers run many of them at
//! once by giving each partition task its own connection from a [`StoreConnector`].

use super::target::ConnectionTarget;
use crate::error::Result;
use bson::Document;
use std::sync::Arc;

/// A connection to one document store deployment.
pub trait DocumentStore: Send + Sync {
    /// Names of the databases that currently hold at least one collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`](crate::Error::Connectivity) if the store cannot be reached
    fn list_database_names(&self) -> Result<Vec<String>>;

    /// Names of the collections in `database`; empty if the database does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`](crate::Error::Connectivity) if the store cannot be reached
    fn list_collection_names(&self, database: &str) -> Result<Vec<String>>;

    /// Fast, metadata-based document count for a whole collection. Ignores any filter
    /// and may be stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached
    fn estimated_document_count(&self, database: &str, collection: &str) -> Result<u64>;

    /// Exact number of documents produced by `pipeline`. May scan the collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`](crate::Error::Query) if the store rejects the pipeline
    fn count_documents(&self, database: &str, collection: &str, pipeline: &[Document])
    -> Result<u64>;

    /// Run an aggregation pipeline and return every resulting document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`](crate::Error::Query) if the store rejects the pipeline
    fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Document],
    ) -> Result<Vec<Document>>;

    /// Bulk insert; returns the number of documents inserted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Insert`](crate::Error::Insert) with the number of documents that
    /// committed before the failure
    fn insert_many(&self, database: &str, collection: &str, docs: Vec<Document>) -> Result<usize>;
}

/// Opens connections. Shared by all partition tasks of one call.
pub trait StoreConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`](crate::Error::Connectivity) if no store answers at `uri`
    fn connect(&self, uri: &str) -> Result<Arc<dyn DocumentStore>>;
}

/// The two counting paths the partition planner chooses between.
pub trait RowCountSource {
    /// Cheap approximate size of the target collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be obtained
    fn estimated_count(&self, target: &ConnectionTarget) -> Result<u64>;

    /// Precise number of documents the pipeline yields.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be obtained or the pipeline is rejected
    fn exact_count(&self, target: &ConnectionTarget, pipeline: &[Document]) -> Result<u64>;
}

impl<S: DocumentStore + ?Sized> RowCountSource for S {
    fn estimated_count(&self, target: &ConnectionTarget) -> Result<u64> {
        self.estimated_document_count(&target.database, &target.collection)
    }

    fn exact_count(&self, target: &ConnectionTarget, pipeline: &[Document]) -> Result<u64> {
        self.count_documents(&target.database, &target.collection, pipeline)
    }
}
