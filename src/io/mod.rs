//! Storage connectors.
//!
//! Each backend lives in its own module and exposes a `read_*` entry point returning a
//! lazy [`Dataset`](crate::Dataset) and a `write_*` entry point taking a
//! [`MaterializedDataset`](crate::MaterializedDataset).

pub mod mongo;
