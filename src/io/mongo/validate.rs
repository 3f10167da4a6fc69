use super::target::ConnectionTarget;
use super::traits::DocumentStore;
use crate::error::{ConfigurationError, Result};

/// Check that `target`'s database and collection exist.
///
/// A database is only visible once it holds a collection, so an empty database is
/// reported as not found. Store errors (including connectivity) pass through as-is.
///
/// # Errors
/// [`ConfigurationError::DatabaseNotFound`] or [`ConfigurationError::CollectionNotFound`]
/// when the target is missing, or the store's own error if listing fails.
pub fn validate_target(store: &dyn DocumentStore, target: &ConnectionTarget) -> Result<()> {
    let databases = store.list_database_names()?;
    if !databases.iter().any(|d| *d == target.database) {
        tracing::warn!(database = %target.database, "database not found");
        return Err(ConfigurationError::DatabaseNotFound {
            database: target.database.clone(),
        }
        .into());
    }

    let collections = store.list_collection_names(&target.database)?;
    if !collections.iter().any(|c| *c == target.collection) {
        tracing::warn!(
            database = %target.database,
            collection = %target.collection,
            "collection not found"
        );
        return Err(ConfigurationError::CollectionNotFound {
            database: target.database.clone(),
            collection: target.collection.clone(),
        }
        .into());
    }

    tracing::debug!(%target, "target validated");
    Ok(())
}
