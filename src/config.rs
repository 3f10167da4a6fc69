//! Process-wide execution settings.
//!
//! A [`DataContext`] is passed explicitly into every read and write call. Nothing in the
//! crate reads a global, so tests can pin the auto-tuned parallelism or the sample size
//! without interfering with each other.

use crate::io::mongo::CountBasis;
use crate::runner::ExecMode;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Number of partitions used when a read does not request one.
pub const DEFAULT_PARALLELISM: usize = 200;

/// Number of documents sampled to infer a schema.
pub const DEFAULT_SCHEMA_SAMPLE_SIZE: usize = 100;

/// Settings shared by every read and write issued through this crate.
///
/// ```
/// use ironbeam_mongo::DataContext;
///
/// let ctx = DataContext::default().with_default_parallelism(8);
/// assert_eq!(ctx.default_parallelism, 8);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataContext {
    /// Partition count chosen when the caller does not override it. Independent of the
    /// number of matching documents.
    pub default_parallelism: usize,
    /// Upper bound on the documents read to infer a schema.
    pub schema_sample_size: usize,
    /// Which count drives partition sizing.
    pub count_basis: CountBasis,
    /// How per-partition tasks are executed.
    pub exec_mode: ExecMode,
}

impl Default for DataContext {
    fn default() -> Self {
        Self {
            default_parallelism: DEFAULT_PARALLELISM,
            schema_sample_size: DEFAULT_SCHEMA_SAMPLE_SIZE,
            count_basis: CountBasis::Estimated,
            exec_mode: ExecMode::Parallel { threads: None },
        }
    }
}

impl DataContext {
    /// Parse a context from JSON; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed, has unknown keys, or sets a zero
    /// parallelism or sample size.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let ctx: Self = serde_json::from_str(json).context("parse DataContext JSON")?;
        ctx.validate()?;
        Ok(ctx)
    }

    /// Reject settings that would make planning impossible.
    ///
    /// # Errors
    /// Returns an error if `default_parallelism` or `schema_sample_size` is zero.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.default_parallelism > 0, "default_parallelism must be positive");
        anyhow::ensure!(self.schema_sample_size > 0, "schema_sample_size must be positive");
        Ok(())
    }

    #[must_use]
    pub const fn with_default_parallelism(mut self, n: usize) -> Self {
        self.default_parallelism = n;
        self
    }

    #[must_use]
    pub const fn with_schema_sample_size(mut self, n: usize) -> Self {
        self.schema_sample_size = n;
        self
    }

    #[must_use]
    pub const fn with_count_basis(mut self, basis: CountBasis) -> Self {
        self.count_basis = basis;
        self
    }

    #[must_use]
    pub const fn with_exec_mode(mut self, mode: ExecMode) -> Self {
        self.exec_mode = mode;
        self
    }
}
