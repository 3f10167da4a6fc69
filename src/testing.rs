//! Testing utilities for code built on the connector.
//!
//! Everything here runs against [`InMemoryStore`](crate::io::mongo::InMemoryStore), so
//! tests need no server:
//!
//! - **Fixtures**: seeded stores and the `float_field`/`int_field` sample collection
//! - **Assertions**: coverage and disjointness of partitioned reads, error-kind checks
//!
//! # Quick Start
//!
//! ```
//! use ironbeam_mongo::DataContext;
//! use ironbeam_mongo::io::mongo::{ReadMongoOptions, read_mongo};
//! use ironbeam_mongo::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let (store, connector) = seeded_connector("db", "coll", numeric_docs(0..5));
//! let ds = read_mongo(
//!     connector,
//!     &DataContext::default(),
//!     ReadMongoOptions::new(TEST_URI, "db", "coll").with_override_num_blocks(3),
//! )?
//! .materialize()?;
//!
//! assert_disjoint_cover(&ds, "int_field", &(0..5).collect::<Vec<i64>>());
//! assert_eq!(store.stats().aggregate_calls, 4); // 1 sample + 3 windows
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
