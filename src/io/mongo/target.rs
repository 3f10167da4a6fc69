use bson::Document;
use std::fmt;

/// Where a read or write goes. Built once per call and shared read-only by every task.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl ConnectionTarget {
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// The documents a read addresses.
///
/// `pipeline` is passed to the store verbatim; an empty pipeline matches every document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    pub pipeline: Vec<Document>,
    pub requested_partitions: Option<usize>,
}

impl QuerySpec {
    #[must_use]
    pub fn match_all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Vec<Document>) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub const fn with_requested_partitions(mut self, n: usize) -> Self {
        self.requested_partitions = Some(n);
        self
    }

    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.pipeline.is_empty()
    }
}
