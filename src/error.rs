//! Error taxonomy for the document-store connector.
//!
//! Errors fall into four families that callers are expected to tell apart:
//!
//! - [`Error::Connectivity`]: the store could not be reached at all. Raised by the
//!   driver behind [`StoreConnector`](crate::io::mongo::StoreConnector) and forwarded
//!   untouched.
//! - [`Error::Configuration`]: the named database or collection does not exist, or an
//!   option is out of range. Always raised before any partition work is scheduled.
//! - [`Error::Query`]: the store rejected a pipeline stage or filter.
//! - [`Error::Write`]: one or more partition writes failed. Partitions that committed
//!   before the failure are not rolled back.
//!
//! The mongo layer returns [`Result`]. The dataset layer returns `anyhow::Result` and
//! forwards these errors without wrapping, so `err.downcast_ref::<Error>()` recovers the
//! kind at the call site.

use std::fmt;
use thiserror::Error;

/// Result alias used across the store boundary and the planning layer.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("cannot reach document store at {uri}: {message}")]
    Connectivity { uri: String, message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("query rejected by the store: {0}")]
    Query(String),

    #[error("block conversion failed: {0}")]
    Conversion(String),

    #[error("partition {partition} failed to read")]
    Fetch {
        partition: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("bulk insert stopped after {inserted} documents: {message}")]
    Insert { inserted: usize, message: String },

    #[error(transparent)]
    Write(#[from] WriteFailure),

    #[error("task execution failed: {0}")]
    Execution(String),
}

impl Error {
    pub fn connectivity(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            uri: uri.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Conversion(e.to_string())
    }
}

/// A named resource is missing or an option is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("database not found: `{database}`")]
    DatabaseNotFound { database: String },

    #[error("collection not found: `{database}.{collection}`")]
    CollectionNotFound { database: String, collection: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// One partition's write error, as recorded in a [`WriteFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub partition: usize,
    pub message: String,
}

/// Aggregate failure of a parallel bulk write.
///
/// `inserted` counts documents that did commit, across both the successful partitions
/// and any partial progress the store reported for failed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub partitions: usize,
    pub inserted: usize,
    pub failed: Vec<PartitionFailure>,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} partition writes failed ({} documents committed)",
            self.failed.len(),
            self.partitions,
            self.inserted
        )?;
        if let Some(first) = self.failed.first() {
            write!(f, "; partition {}: {}", first.partition, first.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for WriteFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_name_the_resource() {
        let err: Error = ConfigurationError::CollectionNotFound {
            database: "foo-db".into(),
            collection: "bar".into(),
        }
        .into();
        assert!(err.is_configuration());
        assert!(!err.is_connectivity());
        assert_eq!(err.to_string(), "collection not found: `foo-db.bar`");
    }

    #[test]
    fn write_failure_reports_first_failed_partition() {
        let failure = WriteFailure {
            partitions: 3,
            inserted: 4,
            failed: vec![PartitionFailure {
                partition: 1,
                message: "duplicate key".into(),
            }],
        };
        assert_eq!(
            failure.to_string(),
            "1 of 3 partition writes failed (4 documents committed); partition 1: duplicate key"
        );
    }
}
