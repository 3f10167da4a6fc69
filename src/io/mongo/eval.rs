//! In-process evaluation of aggregation pipelines for [`InMemoryStore`](super::InMemoryStore).
//!
//! Supports the stages the connector itself emits plus the common filter shapes
//! callers pass in: `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`.
//! Filters understand implicit equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`, `$nin`, `$exists`, `$and`, `$or` and `$nor`, with dotted paths.
//!
//! Unknown stages or operators are rejected with [`Error::Query`], the way a real
//! server's parser would reject them.

use crate::error::{Error, Result};
use bson::{Bson, Document};
use std::cmp::Ordering;

/// Apply `pipeline` to `docs` in stage order.
///
/// # Errors
/// Returns [`Error::Query`] for an unknown or malformed stage.
pub fn run_pipeline(docs: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
    pipeline.iter().try_fold(docs, apply_stage)
}

fn apply_stage(docs: Vec<Document>, stage: &Document) -> Result<Vec<Document>> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(query_error(
            "a pipeline stage specification object must contain exactly one field",
        ));
    };
    match name.as_str() {
        "$match" => {
            let filter = as_document(spec, "$match")?;
            let mut out = Vec::with_capacity(docs.len());
            for doc in docs {
                if matches(&doc, filter)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        "$sort" => sort(docs, as_document(spec, "$sort")?),
        "$skip" => {
            let n = as_count(spec, "$skip")?;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$limit" => {
            let n = as_count(spec, "$limit")?;
            if n == 0 {
                return Err(query_error("the limit must be positive"));
            }
            Ok(docs.into_iter().take(n).collect())
        }
        "$project" => project(docs, as_document(spec, "$project")?),
        "$count" => {
            let Bson::String(field) = spec else {
                return Err(query_error("the count field must be a non-empty string"));
            };
            if docs.is_empty() {
                return Ok(vec![]);
            }
            let n = i64::try_from(docs.len()).unwrap_or(i64::MAX);
            let value = i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32);
            let mut out = Document::new();
            out.insert(field.clone(), value);
            Ok(vec![out])
        }
        other => Err(query_error(format!(
            "Unrecognized pipeline stage name: '{other}'"
        ))),
    }
}

/// Does `doc` satisfy the filter document `filter`?
///
/// # Errors
/// Returns [`Error::Query`] for an unknown operator or a malformed operand.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => logical_operands(cond, "$and")?
                .iter()
                .map(|f| matches(doc, f))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .all(|b| b),
            "$or" => logical_operands(cond, "$or")?
                .iter()
                .map(|f| matches(doc, f))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .any(|b| b),
            "$nor" => !logical_operands(cond, "$nor")?
                .iter()
                .map(|f| matches(doc, f))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .any(|b| b),
            k if k.starts_with('$') => {
                return Err(query_error(format!("unknown top level operator: {k}")));
            }
            path => field_matches(lookup(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn field_matches(value: Option<&Bson>, cond: &Bson) -> Result<bool> {
    let Bson::Document(ops) = cond else {
        return Ok(equals(value, cond));
    };
    if !ops.keys().next().is_some_and(|k| k.starts_with('$')) {
        return Ok(equals(value, cond));
    }
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compare_in_bracket(value, operand).is_some_and(Ordering::is_gt),
            "$gte" => compare_in_bracket(value, operand).is_some_and(Ordering::is_ge),
            "$lt" => compare_in_bracket(value, operand).is_some_and(Ordering::is_lt),
            "$lte" => compare_in_bracket(value, operand).is_some_and(Ordering::is_le),
            "$in" => in_array(value, operand, "$in")?,
            "$nin" => !in_array(value, operand, "$nin")?,
            "$exists" => match operand {
                Bson::Boolean(want) => value.is_some() == *want,
                other => value.is_some() == is_truthy(other),
            },
            other => return Err(query_error(format!("unknown operator: {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_array(value: Option<&Bson>, operand: &Bson, op: &str) -> Result<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(query_error(format!("{op} needs an array")));
    };
    Ok(candidates.iter().any(|c| equals(value, c)))
}

/// Follow a dotted path through embedded documents.
#[must_use]
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(d) => d.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => {
            items.iter().any(|item| compare_bson(item, operand) == Ordering::Equal)
        }
        Some(v) => compare_bson(v, operand) == Ordering::Equal,
    }
}

fn compare_in_bracket(value: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    let value = value?;
    (type_bracket(value) == type_bracket(operand)).then(|| compare_bson(value, operand))
}

/// Canonical sort rank of a BSON type; values of different ranks never compare equal.
fn type_bracket(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// Total order over BSON values: by type bracket first, then by value.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_bracket(a), type_bracket(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        (x, y) if ra == 2 => as_f64(x).total_cmp(&as_f64(y)),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::Array(x), Bson::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_bson(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Bson::Document(x), Bson::Document(y)) => x
            .iter()
            .zip(y)
            .map(|((kl, vl), (kr, vr))| kl.cmp(kr).then_with(|| compare_bson(vl, vr)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: &Bson) -> f64 {
    match v {
        Bson::Double(x) => *x,
        Bson::Int32(x) => f64::from(*x),
        Bson::Int64(x) => *x as f64,
        _ => f64::NAN,
    }
}

fn is_truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(x) => *x != 0,
        Bson::Int64(x) => *x != 0,
        Bson::Double(x) => *x != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn sort(mut docs: Vec<Document>, keys: &Document) -> Result<Vec<Document>> {
    if keys.is_empty() {
        return Err(query_error("$sort stage must have at least one sort key"));
    }
    let mut order = Vec::with_capacity(keys.len());
    for (field, dir) in keys {
        let ascending = match dir {
            Bson::Int32(1) | Bson::Int64(1) => true,
            Bson::Int32(-1) | Bson::Int64(-1) => false,
            Bson::Double(d) if (*d - 1.0).abs() < f64::EPSILON => true,
            Bson::Double(d) if (*d + 1.0).abs() < f64::EPSILON => false,
            _ => {
                return Err(query_error(format!(
                    "$sort key ordering must be 1 or -1 for `{field}`"
                )));
            }
        };
        order.push((field.as_str(), ascending));
    }
    docs.sort_by(|a, b| {
        order
            .iter()
            .map(|(field, ascending)| {
                let l = lookup(a, field).unwrap_or(&Bson::Null);
                let r = lookup(b, field).unwrap_or(&Bson::Null);
                let o = compare_bson(l, r);
                if *ascending { o } else { o.reverse() }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    Ok(docs)
}

fn project(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>> {
    let mut include_id = true;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (field, flag) in spec {
        let keep = match flag {
            Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => is_truthy(flag),
            _ => return Err(query_error(format!("unsupported projection value for `{field}`"))),
        };
        match (field.as_str(), keep) {
            ("_id", keep) => include_id = keep,
            (_, true) => included.push(field.as_str()),
            (_, false) => excluded.push(field.as_str()),
        }
    }
    if !included.is_empty() && !excluded.is_empty() {
        return Err(query_error(format!(
            "Cannot do exclusion on field {} in inclusion projection",
            excluded[0]
        )));
    }
    let inclusion = !included.is_empty();
    Ok(docs
        .into_iter()
        .map(|doc| {
            doc.into_iter()
                .filter(|(k, _)| {
                    if k == "_id" {
                        include_id
                    } else if inclusion {
                        included.contains(&k.as_str())
                    } else {
                        !excluded.contains(&k.as_str())
                    }
                })
                .collect()
        })
        .collect())
}

fn as_document<'a>(spec: &'a Bson, stage: &str) -> Result<&'a Document> {
    match spec {
        Bson::Document(d) => Ok(d),
        _ => Err(query_error(format!("the {stage} stage specification must be an object"))),
    }
}

fn as_count(spec: &Bson, stage: &str) -> Result<usize> {
    let n = match spec {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(d) if d.fract() == 0.0 => *d as i64,
        _ => return Err(query_error(format!("{stage} needs an integer"))),
    };
    usize::try_from(n).map_err(|_| query_error(format!("{stage} must be non-negative")))
}

fn logical_operands<'a>(cond: &'a Bson, op: &str) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = cond else {
        return Err(query_error(format!("{op} must be an array")));
    };
    if items.is_empty() {
        return Err(query_error(format!("{op} must be a nonempty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(query_error(format!("{op} entries must be objects"))),
        })
        .collect()
}

fn query_error(msg: impl Into<String>) -> Error {
    Error::Query(msg.into())
}
