//! Schema resolution: declared by the caller, or inferred from a sample.
//!
//! A declared schema is used as-is and doubles as a column projection: only its
//! fields are fetched, in its order. Without one, the resolver reads a bounded,
//! `_id`-ordered sample of the documents the pipeline produces and builds the schema
//! from first-seen field order, with `_id` leading. The same collection state always
//! yields the same sample and therefore the same schema.
//!
//! Whenever the caller supplies a pipeline, the sample is read even for a declared
//! schema. That surfaces a malformed pipeline at planning time, and it shows whether
//! `_id` still orders the pipeline's output: a pipeline that drops `_id` or repeats it
//! leaves skip/limit windows without a stable order.

use super::target::{ConnectionTarget, QuerySpec};
use super::traits::DocumentStore;
use crate::block::{arrow_type_for, schema_display};
use crate::error::Result;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use bson::{Bson, Document, doc};
use std::fmt;
use std::sync::Arc;

/// Name of the store-assigned document identifier.
pub const ID_FIELD: &str = "_id";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaSource {
    Declared,
    Sampled { documents: usize },
}

/// The fixed column layout every block of one read conforms to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSchema {
    schema: SchemaRef,
    source: SchemaSource,
    id_ordered: bool,
}

impl ResolvedSchema {
    /// A caller-declared schema from ordered `(name, type)` pairs.
    ///
    /// ```
    /// use arrow::datatypes::DataType;
    /// use ironbeam_mongo::io::mongo::ResolvedSchema;
    ///
    /// let schema = ResolvedSchema::declared([
    ///     ("float_field", DataType::Float64),
    ///     ("int_field", DataType::Int32),
    /// ]);
    /// assert_eq!(schema.field_names(), vec!["float_field", "int_field"]);
    /// ```
    pub fn declared<N: Into<String>>(fields: impl IntoIterator<Item = (N, DataType)>) -> Self {
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|(name, dt)| Field::new(name, dt, true))
            .collect();
        Self::from_arrow(Arc::new(Schema::new(fields)))
    }

    /// A caller-declared schema from an Arrow schema.
    #[must_use]
    pub const fn from_arrow(schema: SchemaRef) -> Self {
        Self {
            schema,
            source: SchemaSource::Declared,
            id_ordered: true,
        }
    }

    /// Whether `_id` gives the read a total order, so it may be split into windows.
    ///
    /// False when the sample had a document without `_id` or two with the same one.
    #[must_use]
    pub const fn id_ordered(&self) -> bool {
        self.id_ordered
    }

    fn with_id_ordered(mut self, ordered: bool) -> Self {
        self.id_ordered = ordered;
        self
    }

    #[must_use]
    pub const fn arrow(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub const fn source(&self) -> SchemaSource {
        self.source
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.schema.fields().iter().map(|f| f.name().as_str()).collect()
    }

    /// True when the schema was inferred from an empty sample; nothing is known beyond
    /// the identifier.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self.source, SchemaSource::Sampled { documents: 0 })
    }

    /// The schema to advertise before materialization, `None` while unknown.
    #[must_use]
    pub fn known(&self) -> Option<SchemaRef> {
        (!self.is_unknown()).then(|| Arc::clone(&self.schema))
    }

    /// `$project` stage restricting fetched documents to a declared schema's fields.
    #[must_use]
    pub fn projection(&self) -> Option<Document> {
        if self.source != SchemaSource::Declared {
            return None;
        }
        let mut spec = Document::new();
        for name in self.field_names() {
            spec.insert(name, 1);
        }
        if !spec.contains_key(ID_FIELD) {
            spec.insert(ID_FIELD, 0);
        }
        Some(doc! { "$project": spec })
    }
}

impl fmt::Display for ResolvedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("Unknown schema")
        } else {
            f.write_str(&schema_display(&self.schema))
        }
    }
}

/// Decides the output schema of a read.
#[derive(Clone, Copy, Debug)]
pub struct SchemaResolver {
    sample_size: usize,
}

impl SchemaResolver {
    #[must_use]
    pub const fn new(sample_size: usize) -> Self {
        Self {
            sample_size: if sample_size == 0 { 1 } else { sample_size },
        }
    }

    /// Return `explicit`, or infer a schema from a sample of `query`'s result.
    ///
    /// A declared schema skips the sample only when `query` has no pipeline stages.
    ///
    /// # Errors
    /// Propagates store errors from sampling, including query errors for a malformed
    /// pipeline.
    pub fn resolve(
        &self,
        store: &dyn DocumentStore,
        target: &ConnectionTarget,
        query: &QuerySpec,
        explicit: Option<ResolvedSchema>,
    ) -> Result<ResolvedSchema> {
        if let Some(schema) = &explicit
            && query.pipeline.is_empty()
        {
            tracing::debug!(
                %target,
                fields = schema.schema.fields().len(),
                "using declared schema"
            );
            return Ok(schema.clone());
        }
        let sample = store.aggregate(
            &target.database,
            &target.collection,
            &self.sample_pipeline(query),
        )?;
        let ordered = ids_order_sample(&sample);
        if !ordered {
            tracing::warn!(%target, "pipeline output lacks a unique _id, reading one window");
        }
        let schema = match explicit {
            Some(schema) => {
                tracing::debug!(
                    %target,
                    sampled = sample.len(),
                    "checked pipeline for declared schema"
                );
                schema
            }
            None => {
                let schema = infer_schema(&sample);
                tracing::debug!(
                    %target,
                    sampled = sample.len(),
                    schema = %schema,
                    "inferred schema"
                );
                schema
            }
        };
        Ok(schema.with_id_ordered(ordered))
    }

    /// The query pipeline followed by a deterministic `_id` sort and the sample limit.
    #[must_use]
    pub fn sample_pipeline(&self, query: &QuerySpec) -> Vec<Document> {
        let limit = i64::try_from(self.sample_size).unwrap_or(i64::MAX);
        let mut pipeline = query.pipeline.clone();
        pipeline.push(doc! { "$sort": { ID_FIELD: 1 } });
        pipeline.push(doc! { "$limit": limit });
        pipeline
    }
}

/// Build a schema from documents in first-seen field order.
///
/// `_id` leads whenever the sample carries it, and also for an empty sample, where it
/// is the only field known to exist. A field's type comes from its first non-null
/// value; numeric fields that mix widths widen to `int64`, and integers mixed with doubles widen to
/// `double`. Fields that are only ever null become `string`.
#[must_use]
pub fn infer_schema(docs: &[Document]) -> ResolvedSchema {
    let mut order: Vec<String> = vec![ID_FIELD.to_string()];
    let mut types: Vec<Option<DataType>> = vec![None];
    let mut id_seen = docs.is_empty();

    for doc in docs {
        id_seen |= doc.contains_key(ID_FIELD);
        for (name, value) in doc {
            let slot = match order.iter().position(|n| n == name) {
                Some(i) => i,
                None => {
                    order.push(name.clone());
                    types.push(None);
                    order.len() - 1
                }
            };
            if matches!(value, Bson::Null | Bson::Undefined) {
                continue;
            }
            let seen = arrow_type_for(value);
            types[slot] = Some(match types[slot].take() {
                None => seen,
                Some(prev) => widen(prev, seen),
            });
        }
    }

    let id_type = DataType::FixedSizeBinary(crate::block::OBJECT_ID_WIDTH);
    let fields: Vec<Field> = order
        .into_iter()
        .zip(types)
        .enumerate()
        .filter(|(i, _)| *i > 0 || id_seen)
        .map(|(i, (name, dt))| {
            let fallback = if i == 0 { id_type.clone() } else { DataType::Utf8 };
            Field::new(name, dt.unwrap_or(fallback), true)
        })
        .collect();

    ResolvedSchema {
        schema: Arc::new(Schema::new(fields)),
        source: SchemaSource::Sampled {
            documents: docs.len(),
        },
        id_ordered: true,
    }
}

/// True when every document of an `_id`-sorted sample has an `_id` distinct from its
/// neighbour's.
fn ids_order_sample(sample: &[Document]) -> bool {
    sample.iter().all(|d| d.contains_key(ID_FIELD))
        && sample
            .windows(2)
            .all(|w| w[0].get(ID_FIELD) != w[1].get(ID_FIELD))
}

fn widen(prev: DataType, seen: DataType) -> DataType {
    match (&prev, &seen) {
        _ if prev == seen => prev,
        (DataType::Int32, DataType::Int64) | (DataType::Int64, DataType::Int32) => DataType::Int64,
        (DataType::Int32 | DataType::Int64, DataType::Float64)
        | (DataType::Float64, DataType::Int32 | DataType::Int64) => DataType::Float64,
        _ => prev,
    }
}
