//! Columnar blocks and their conversion to and from BSON documents.
//!
//! A [`Block`] is one Arrow `RecordBatch`. Reads turn the documents of one partition
//! into a block whose columns follow the resolved schema exactly; writes turn a block
//! back into documents for a bulk insert.
//!
//! # Type mapping
//!
//! | BSON        | Arrow                    |
//! |-------------|--------------------------|
//! | ObjectId    | `FixedSizeBinary(12)`    |
//! | Double      | `Float64`                |
//! | Int32       | `Int32`                  |
//! | Int64       | `Int64`                  |
//! | String      | `Utf8`                   |
//! | Boolean     | `Boolean`                |
//! | DateTime    | `Timestamp(ms)`          |
//! | anything else | `Utf8` (relaxed extended JSON) |
//!
//! A value whose BSON type does not fit its column is stored as null, as is a missing
//! field. Integer columns accept narrower or in-range integers.

use crate::error::{Error, Result};
use arrow::array::{
    ArrayRef, AsArray, BooleanBuilder, FixedSizeBinaryBuilder, Float64Builder, Int32Builder,
    Int64Builder, StringBuilder, TimestampMillisecondBuilder,
};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, Schema,
    SchemaRef, TimeUnit, TimestampMillisecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document};
use std::sync::Arc;

/// One partition's rows in columnar form.
pub type Block = RecordBatch;

/// Byte width of a BSON ObjectId.
pub const OBJECT_ID_WIDTH: i32 = 12;

/// Arrow type a BSON value infers to.
#[must_use]
pub fn arrow_type_for(value: &Bson) -> DataType {
    match value {
        Bson::ObjectId(_) => DataType::FixedSizeBinary(OBJECT_ID_WIDTH),
        Bson::Double(_) => DataType::Float64,
        Bson::Int32(_) => DataType::Int32,
        Bson::Int64(_) => DataType::Int64,
        Bson::Boolean(_) => DataType::Boolean,
        Bson::DateTime(_) => DataType::Timestamp(TimeUnit::Millisecond, None),
        _ => DataType::Utf8,
    }
}

/// Short type name in the style dataset schemas are printed with (`double`, `int32`,
/// `fixed_size_binary[12]`, ...).
#[must_use]
pub fn type_display_name(dt: &DataType) -> String {
    match dt {
        DataType::Null => "null".into(),
        DataType::Boolean => "bool".into(),
        DataType::Int8 => "int8".into(),
        DataType::Int16 => "int16".into(),
        DataType::Int32 => "int32".into(),
        DataType::Int64 => "int64".into(),
        DataType::UInt8 => "uint8".into(),
        DataType::UInt16 => "uint16".into(),
        DataType::UInt32 => "uint32".into(),
        DataType::UInt64 => "uint64".into(),
        DataType::Float32 => "float".into(),
        DataType::Float64 => "double".into(),
        DataType::Utf8 => "string".into(),
        DataType::LargeUtf8 => "large_string".into(),
        DataType::Binary => "binary".into(),
        DataType::FixedSizeBinary(n) => format!("fixed_size_binary[{n}]"),
        DataType::Timestamp(unit, tz) => {
            let unit = match unit {
                TimeUnit::Second => "s",
                TimeUnit::Millisecond => "ms",
                TimeUnit::Microsecond => "us",
                TimeUnit::Nanosecond => "ns",
            };
            match tz {
                Some(tz) => format!("timestamp[{unit}, tz={tz}]"),
                None => format!("timestamp[{unit}]"),
            }
        }
        other => other.to_string().to_lowercase(),
    }
}

/// Render a schema as `{name: type, ...}`.
#[must_use]
pub fn schema_display(schema: &Schema) -> String {
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), type_display_name(f.data_type())))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

/// Build a block holding exactly the columns of `schema`, in its order.
///
/// # Errors
/// Returns [`Error::Conversion`] if the schema has a column type with no BSON mapping.
pub fn documents_to_block(docs: &[Document], schema: &SchemaRef) -> Result<Block> {
    if schema.fields().is_empty() {
        let options = RecordBatchOptions::new().with_row_count(Some(docs.len()));
        return Ok(RecordBatch::try_new_with_options(
            Arc::clone(schema),
            vec![],
            &options,
        )?);
    }
    let columns = schema
        .fields()
        .iter()
        .map(|field| build_column(field, docs))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

fn build_column(field: &Field, docs: &[Document]) -> Result<ArrayRef> {
    let name = field.name().as_str();
    let values = docs.iter().map(|d| d.get(name));
    let n = docs.len();

    let array: ArrayRef = match field.data_type() {
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(n);
            for v in values {
                b.append_option(match v {
                    Some(Bson::Double(x)) => Some(*x),
                    Some(Bson::Int32(x)) => Some(f64::from(*x)),
                    #[allow(clippy::cast_precision_loss)]
                    Some(Bson::Int64(x)) => Some(*x as f64),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        DataType::Int32 => {
            let mut b = Int32Builder::with_capacity(n);
            for v in values {
                b.append_option(match v {
                    Some(Bson::Int32(x)) => Some(*x),
                    Some(Bson::Int64(x)) => i32::try_from(*x).ok(),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(n);
            for v in values {
                b.append_option(match v {
                    Some(Bson::Int64(x)) => Some(*x),
                    Some(Bson::Int32(x)) => Some(i64::from(*x)),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(n);
            for v in values {
                b.append_option(match v {
                    Some(Bson::Boolean(x)) => Some(*x),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(n, n * 8);
            for v in values {
                match v {
                    None | Some(Bson::Null | Bson::Undefined) => b.append_null(),
                    Some(Bson::String(s)) => b.append_value(s),
                    Some(other) => b.append_value(other.clone().into_relaxed_extjson().to_string()),
                }
            }
            Arc::new(b.finish())
        }
        DataType::FixedSizeBinary(OBJECT_ID_WIDTH) => {
            let mut b = FixedSizeBinaryBuilder::with_capacity(n, OBJECT_ID_WIDTH);
            for v in values {
                match v {
                    Some(Bson::ObjectId(oid)) => b.append_value(oid.bytes())?,
                    _ => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Timestamp(TimeUnit::Millisecond, None) => {
            let mut b = TimestampMillisecondBuilder::with_capacity(n);
            for v in values {
                b.append_option(match v {
                    Some(Bson::DateTime(dt)) => Some(dt.timestamp_millis()),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        other => {
            return Err(Error::Conversion(format!(
                "column `{name}` has type {other}, which has no document mapping"
            )));
        }
    };
    Ok(array)
}

/// Turn every row of a block into a document, columns in schema order.
///
/// Null cells are left out of the document rather than written as BSON null.
///
/// # Errors
/// Returns [`Error::Conversion`] for a column type with no BSON mapping, or a
/// `UInt64` value that does not fit in a signed 64-bit integer.
pub fn block_to_documents(block: &Block) -> Result<Vec<Document>> {
    let schema = block.schema();
    let mut docs: Vec<Document> = (0..block.num_rows()).map(|_| Document::new()).collect();
    for (field, column) in schema.fields().iter().zip(block.columns()) {
        for (row, doc) in docs.iter_mut().enumerate() {
            if let Some(value) = cell_to_bson(column, row, field.name())? {
                doc.insert(field.name().clone(), value);
            }
        }
    }
    Ok(docs)
}

fn cell_to_bson(array: &ArrayRef, row: usize, name: &str) -> Result<Option<Bson>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let value = match array.data_type() {
        DataType::Float64 => Bson::Double(array.as_primitive::<Float64Type>().value(row)),
        DataType::Float32 => {
            Bson::Double(f64::from(array.as_primitive::<Float32Type>().value(row)))
        }
        DataType::Int8 => Bson::Int32(i32::from(array.as_primitive::<Int8Type>().value(row))),
        DataType::Int16 => Bson::Int32(i32::from(array.as_primitive::<Int16Type>().value(row))),
        DataType::Int32 => Bson::Int32(array.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => Bson::Int64(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Bson::Int32(i32::from(array.as_primitive::<UInt8Type>().value(row))),
        DataType::UInt16 => Bson::Int32(i32::from(array.as_primitive::<UInt16Type>().value(row))),
        DataType::UInt32 => Bson::Int64(i64::from(array.as_primitive::<UInt32Type>().value(row))),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            Bson::Int64(i64::try_from(v).map_err(|_| {
                Error::Conversion(format!("column `{name}` value {v} overflows int64"))
            })?)
        }
        DataType::Boolean => Bson::Boolean(array.as_boolean().value(row)),
        DataType::Utf8 => Bson::String(array.as_string::<i32>().value(row).to_owned()),
        DataType::LargeUtf8 => Bson::String(array.as_string::<i64>().value(row).to_owned()),
        DataType::FixedSizeBinary(OBJECT_ID_WIDTH) => {
            let bytes: [u8; 12] = array
                .as_fixed_size_binary()
                .value(row)
                .try_into()
                .map_err(|_| Error::Conversion(format!("column `{name}` is not a 12-byte id")))?;
            Bson::ObjectId(ObjectId::from_bytes(bytes))
        }
        DataType::FixedSizeBinary(_) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: array.as_fixed_size_binary().value(row).to_vec(),
        }),
        DataType::Binary => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: array.as_binary::<i32>().value(row).to_vec(),
        }),
        DataType::Timestamp(TimeUnit::Millisecond, _) => Bson::DateTime(DateTime::from_millis(
            array.as_primitive::<TimestampMillisecondType>().value(row),
        )),
        other => {
            return Err(Error::Conversion(format!(
                "column `{name}` has type {other}, which has no document mapping"
            )));
        }
    };
    Ok(Some(value))
}
