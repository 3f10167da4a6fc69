use super::planner::CountBasis;
use super::schema::ResolvedSchema;
use super::target::{ConnectionTarget, QuerySpec};
use crate::error::{ConfigurationError, Result};
use arrow::datatypes::DataType;
use bson::Document;

/// Parameters of one [`read_mongo`](super::read_mongo) call.
///
/// ```
/// use bson::doc;
/// use ironbeam_mongo::io::mongo::ReadMongoOptions;
///
/// let opts = ReadMongoOptions::new("mongodb://localhost:27017", "db", "coll")
///     .with_pipeline(vec![doc! { "$match": { "int_field": { "$gte": 0, "$lt": 3 } } }])
///     .with_override_num_blocks(2);
/// assert_eq!(opts.query().requested_partitions, Some(2));
/// ```
#[derive(Clone, Debug)]
pub struct ReadMongoOptions {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub pipeline: Vec<Document>,
    pub schema: Option<ResolvedSchema>,
    pub override_num_blocks: Option<usize>,
    /// Overrides the context's count basis for this read.
    pub count_basis: Option<CountBasis>,
}

impl ReadMongoOptions {
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection: collection.into(),
            pipeline: Vec::new(),
            schema: None,
            override_num_blocks: None,
            count_basis: None,
        }
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Vec<Document>) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ResolvedSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Declare the schema as ordered `(name, type)` pairs.
    #[must_use]
    pub fn with_fields<N: Into<String>>(
        self,
        fields: impl IntoIterator<Item = (N, DataType)>,
    ) -> Self {
        self.with_schema(ResolvedSchema::declared(fields))
    }

    #[must_use]
    pub const fn with_override_num_blocks(mut self, n: usize) -> Self {
        self.override_num_blocks = Some(n);
        self
    }

    #[must_use]
    pub const fn with_count_basis(mut self, basis: CountBasis) -> Self {
        self.count_basis = Some(basis);
        self
    }

    /// # Errors
    /// Returns [`ConfigurationError::InvalidOption`] for an empty database or collection
    /// name, a zero block count, or a declared schema without fields.
    pub fn validate(&self) -> Result<()> {
        check_names(&self.database, &self.collection)?;
        if self.override_num_blocks == Some(0) {
            return Err(invalid("override_num_blocks must be positive"));
        }
        if let Some(schema) = &self.schema
            && schema.arrow().fields().is_empty()
        {
            return Err(invalid("a declared schema needs at least one field"));
        }
        Ok(())
    }

    #[must_use]
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(&self.uri, &self.database, &self.collection)
    }

    #[must_use]
    pub fn query(&self) -> QuerySpec {
        QuerySpec {
            pipeline: self.pipeline.clone(),
            requested_partitions: self.override_num_blocks,
        }
    }
}

/// Parameters of one [`write_mongo`](super::write_mongo) call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMongoOptions {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl WriteMongoOptions {
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

    /// # Errors
    /// Returns [`ConfigurationError::InvalidOption`] for an empty database or collection
    /// name.
    pub fn validate(&self) -> Result<()> {
        check_names(&self.database, &self.collection)
    }

    #[must_use]
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(&self.uri, &self.database, &self.collection)
    }
}

fn check_names(database: &str, collection: &str) -> Result<()> {
    if database.is_empty() {
        return Err(invalid("database name must not be empty"));
    }
    if collection.is_empty() {
        return Err(invalid("collection name must not be empty"));
    }
    Ok(())
}

fn invalid(msg: &str) -> crate::Error {
    ConfigurationError::InvalidOption(msg.to_string()).into()
}
