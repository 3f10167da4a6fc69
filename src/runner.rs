//! Execution of independent per-partition tasks.
//!
//! The runner is the scheduling side of the connector: it receives one task per
//! partition (a read of one window, or a bulk insert of one block) and runs them either
//! in-process one after another or on a rayon pool. Tasks share no mutable state, so the
//! runner does no locking; it only guarantees that results come back in task order.

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use serde::Deserialize;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A unit of partition work.
pub type Task<T> = Box<dyn FnOnce() -> Result<T> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Sequential,
    /// Run on rayon; `threads: None` uses the global pool.
    Parallel { threads: Option<usize> },
}

#[derive(Clone, Copy, Debug)]
pub struct Runner {
    pub mode: ExecMode,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None },
        }
    }
}

impl Runner {
    #[must_use]
    pub const fn new(mode: ExecMode) -> Self {
        Self { mode }
    }

    /// Run every task to completion and return each outcome at its task index.
    ///
    /// A failing task never prevents the others from running. A panicking task is
    /// reported as an error for its own index.
    pub fn run_all<T: Send>(&self, tasks: Vec<Task<T>>) -> Vec<Result<T>> {
        match self.mode {
            ExecMode::Sequential => tasks.into_iter().map(run_guarded).collect(),
            ExecMode::Parallel { threads: None } => run_par(tasks),
            ExecMode::Parallel { threads: Some(t) } => {
                match rayon::ThreadPoolBuilder::new().num_threads(t.max(1)).build() {
                    Ok(pool) => pool.install(|| run_par(tasks)),
                    Err(e) => {
                        tracing::warn!(
                            threads = t,
                            error = %e,
                            "falling back to the global rayon pool"
                        );
                        run_par(tasks)
                    }
                }
            }
        }
    }

    /// Run every task and collect the outputs in task order.
    ///
    /// # Errors
    /// Returns the error of the lowest-indexed failing task.
    pub fn run_collect<T: Send>(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>> {
        self.run_all(tasks).into_iter().collect()
    }
}

fn run_par<T: Send>(tasks: Vec<Task<T>>) -> Vec<Result<T>> {
    tasks.into_par_iter().map(run_guarded).collect()
}

fn run_guarded<T>(task: Task<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|panic| {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked".to_string());
        Err(anyhow!(crate::Error::Execution(msg)))
    })
}
