//! Partition planning over skip/limit windows.
//!
//! The planner turns "this pipeline, split N ways" into N [`PartitionDescriptor`]s
//! whose windows tile the `_id`-ordered result set: descriptor `i` starts where
//! descriptor `i - 1` ends, and the last one runs to the end of the result whatever its
//! true length turns out to be. Coverage and disjointness therefore hold even when the
//! count used for sizing is stale or ignores the filter; only balance depends on it.
//!
//! Two count bases are supported:
//!
//! - [`CountBasis::Estimated`] sizes windows from the collection's metadata count. The
//!   requested partition count is always honored, so trailing windows may be empty.
//! - [`CountBasis::Exact`] counts the pipeline's result and caps the partition count at
//!   that number (never below one), so no window is empty unless the result is.
//!
//! A read whose result has no unique `_id` is planned as a single window with
//! [`PartitionPlanner::single_window`], since skip/limit needs a total order.

use super::target::{ConnectionTarget, QuerySpec};
use super::traits::RowCountSource;
use crate::config::DataContext;
use crate::error::{ConfigurationError, Result};
use serde::Deserialize;
use std::fmt;

/// Which document count sizes the partition windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountBasis {
    #[default]
    Estimated,
    Exact,
}

/// Upper bound of a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Limit {
    Rows(u64),
    /// Everything after `skip`.
    Remainder,
}

/// One contiguous `[skip, skip + limit)` window of the ordered result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionDescriptor {
    pub index: usize,
    pub skip: u64,
    pub limit: Limit,
}

impl PartitionDescriptor {
    /// Exclusive end offset, `None` for a remainder window.
    #[must_use]
    pub const fn end(&self) -> Option<u64> {
        match self.limit {
            Limit::Rows(n) => Some(self.skip.saturating_add(n)),
            Limit::Remainder => None,
        }
    }

    /// Number of rows this window addresses in a result of `total` rows.
    #[must_use]
    pub fn rows_within(&self, total: u64) -> u64 {
        let end = self.end().map_or(total, |e| e.min(total));
        end.saturating_sub(self.skip)
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Limit::Rows(n) => write!(f, "#{} [skip={}, limit={}]", self.index, self.skip, n),
            Limit::Remainder => write!(f, "#{} [skip={}, limit=*]", self.index, self.skip),
        }
    }
}

/// The output of one planning call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    pub descriptors: Vec<PartitionDescriptor>,
    /// The count the windows were sized from.
    pub counted_rows: u64,
    pub basis: CountBasis,
    /// Partition count before any capping.
    pub requested: usize,
}

impl PartitionPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Expected rows per descriptor, assuming `counted_rows` is accurate.
    #[must_use]
    pub fn expected_rows(&self) -> Vec<u64> {
        self.descriptors
            .iter()
            .map(|d| d.rows_within(self.counted_rows))
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PartitionPlanner {
    default_parallelism: usize,
    basis: CountBasis,
    single: bool,
}

impl PartitionPlanner {
    #[must_use]
    pub const fn new(default_parallelism: usize, basis: CountBasis) -> Self {
        Self {
            default_parallelism,
            basis,
            single: false,
        }
    }

    /// Plan exactly one open-ended window whatever partition count is requested.
    #[must_use]
    pub const fn single_window(mut self) -> Self {
        self.single = true;
        self
    }

    #[must_use]
    pub const fn from_context(ctx: &DataContext) -> Self {
        Self::new(ctx.default_parallelism, ctx.count_basis)
    }

    #[must_use]
    pub const fn basis(&self) -> CountBasis {
        self.basis
    }

    /// Plan the windows for `query` against `target`.
    ///
    /// Uses `query.requested_partitions` when set, otherwise the configured default
    /// parallelism. The default is chosen without looking at the data.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::InvalidOption`] for a partition count of zero, and
    /// forwards any error from the count source.
    pub fn plan<C: RowCountSource + ?Sized>(
        &self,
        counts: &C,
        target: &ConnectionTarget,
        query: &QuerySpec,
    ) -> Result<PartitionPlan> {
        let requested = query.requested_partitions.unwrap_or(self.default_parallelism);
        if requested == 0 {
            return Err(ConfigurationError::InvalidOption(
                "partition count must be positive".to_string(),
            )
            .into());
        }

        let (counted_rows, n) = match self.basis {
            CountBasis::Estimated => (counts.estimated_count(target)?, requested),
            CountBasis::Exact => {
                let exact = counts.exact_count(target, &query.pipeline)?;
                let cap = usize::try_from(exact).unwrap_or(usize::MAX).max(1);
                (exact, requested.min(cap))
            }
        };
        let n = if self.single { 1 } else { n };

        let descriptors = split(counted_rows, n);
        tracing::debug!(
            %target,
            basis = ?self.basis,
            requested,
            partitions = descriptors.len(),
            counted_rows,
            "planned partitions"
        );
        Ok(PartitionPlan {
            descriptors,
            counted_rows,
            basis: self.basis,
            requested,
        })
    }
}

/// Split `total` rows into `n` contiguous windows of `ceil(total / n)` rows.
///
/// The last window is open-ended. Windows past `total` are still emitted and address
/// nothing. Returns an empty list for `n == 0`.
///
/// ```
/// use ironbeam_mongo::io::mongo::{Limit, split};
///
/// let windows = split(5, 2);
/// assert_eq!((windows[0].skip, windows[0].limit), (0, Limit::Rows(3)));
/// assert_eq!((windows[1].skip, windows[1].limit), (3, Limit::Remainder));
/// ```
#[must_use]
pub fn split(total: u64, n: usize) -> Vec<PartitionDescriptor> {
    if n == 0 {
        return Vec::new();
    }
    let parts = n as u64;
    let chunk = total.div_ceil(parts).max(1);
    (0..n)
        .map(|index| {
            let skip = (index as u64).saturating_mul(chunk);
            let limit = if index + 1 == n {
                Limit::Remainder
            } else {
                Limit::Rows(chunk)
            };
            PartitionDescriptor { index, skip, limit }
        })
        .collect()
}
