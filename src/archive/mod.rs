//! Boundary pacing for the external archival worker.
//!
//! A run has two phases:
//!
//! 1. [`initializer`]: for every auto-archive table, compute the lowest id that
//!    matches the table's static rule terms and retention window, and store it
//!    as the table's `id <` boundary.
//! 2. [`coordinator`]: repeatedly wait for the worker's lock to clear, raise
//!    every boundary by a fixed increment, trigger the worker, and wait for it
//!    to finish. Each pass is timed; [`stats`] summarizes the timings.

pub mod coordinator;
pub mod initializer;
pub mod stats;

use std::sync::Arc;

pub use coordinator::{CoordinatorRun, IterationRecord, RunStatus, run_coordinator};
pub use initializer::{BoundarySource, InitError, InitReport, TableOutcome, initialize_boundaries};
pub use stats::{RunSummary, format_duration, summarize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ArchiveConfig,
    db::{ArchiveRuleRepo, DbError},
    lock::{LockWaitError, LockWaiter},
    trigger::ArchiveTrigger,
};

/// Everything a run needs, built once by the binary.
#[derive(Clone)]
pub struct RunContext {
    pub rules: Arc<dyn ArchiveRuleRepo>,
    pub lock: LockWaiter,
    pub trigger: Arc<dyn ArchiveTrigger>,
    pub archive: ArchiveConfig,
    pub cancel: CancellationToken,
}

/// Fatal errors that end a coordinator run early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("boundary update failed: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Lock(LockWaitError),

    #[error("boundary initialization failed: {0}")]
    Init(#[from] InitError),
}
