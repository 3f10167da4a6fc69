//! Assertion functions for partitioned reads and connector errors.

use crate::MaterializedDataset;
use crate::error::{ConfigurationError, Error};
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type};
use std::collections::HashSet;

/// Values of an integer column across all blocks, in block order, widened to `i64`.
/// Nulls are skipped.
///
/// # Panics
///
/// Panics if the column is missing or not castable to `int64`.
#[must_use]
pub fn column_i64(ds: &MaterializedDataset, column: &str) -> Vec<i64> {
    let mut out = Vec::with_capacity(ds.num_rows());
    for block in ds.blocks() {
        let array = block
            .column_by_name(column)
            .unwrap_or_else(|| panic!("column `{column}` not in dataset"));
        let array = cast(array, &DataType::Int64)
            .unwrap_or_else(|e| panic!("column `{column}` is not an integer column: {e}"));
        let ints = array.as_primitive::<Int64Type>();
        out.extend((0..ints.len()).filter(|&i| ints.is_valid(i)).map(|i| ints.value(i)));
    }
    out
}

/// Assert that `column` holds exactly `expected` across the dataset's blocks, each value
/// once: every row was read and no block repeated another's row.
///
/// # Panics
///
/// Panics on a missing, duplicated, or unexpected value, or if the row count differs.
pub fn assert_disjoint_cover(ds: &MaterializedDataset, column: &str, expected: &[i64]) {
    let actual = column_i64(ds, column);
    let mut seen = HashSet::with_capacity(actual.len());
    let duplicates: Vec<i64> = actual.iter().copied().filter(|v| !seen.insert(*v)).collect();
    assert!(
        duplicates.is_empty(),
        "Rows read by more than one block:\n  Duplicates: {duplicates:?}\n  Block sizes: {:?}",
        ds.block_num_rows()
    );

    let want: HashSet<i64> = expected.iter().copied().collect();
    let missing: Vec<_> = want.difference(&seen).collect();
    let extra: Vec<_> = seen.difference(&want).collect();
    assert!(
        missing.is_empty() && extra.is_empty(),
        "Partitioned read mismatch:\n  Missing: {missing:?}\n  Extra: {extra:?}\n  Block sizes: {:?}",
        ds.block_num_rows()
    );
    assert_eq!(
        ds.num_rows(),
        expected.len(),
        "Row count mismatch: block sizes {:?}",
        ds.block_num_rows()
    );
}

/// Assert that `err` carries a configuration error and return it.
///
/// # Panics
///
/// Panics if `err` is any other kind of error.
pub fn assert_configuration_error(err: &anyhow::Error) -> &ConfigurationError {
    match err.downcast_ref::<Error>() {
        Some(Error::Configuration(inner)) => inner,
        _ => panic!("expected a configuration error, got: {err:#}"),
    }
}

/// Assert that `err` is a connectivity error passed through unchanged.
///
/// # Panics
///
/// Panics if `err` is any other kind of error.
pub fn assert_connectivity_error(err: &anyhow::Error) {
    assert!(
        matches!(err.downcast_ref::<Error>(), Some(Error::Connectivity { .. })),
        "expected a connectivity error, got: {err:#}"
    );
}
