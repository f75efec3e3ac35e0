//! Lock-gated iteration loop.
//!
//! Each iteration waits for the worker's lock to clear, raises every
//! boundary by `increment_value` in one transaction, triggers the worker and
//! waits for the lock to clear again. The time between the two waits ending
//! is recorded as the iteration's duration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{RunContext, RunError};
use crate::{
    db::DbResult,
    lock::LockWaitError,
    models::{ArchiveHeader, LOOP_ACTOR},
};

/// Timing of one completed iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// 1-based.
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed(RunError),
}

impl RunStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed(_))
    }
}

/// Records gathered by the loop and why it stopped.
#[derive(Debug)]
pub struct CoordinatorRun {
    pub records: Vec<IterationRecord>,
    pub status: RunStatus,
}

enum Stop {
    Cancelled,
    Failed(RunError),
}

impl From<LockWaitError> for Stop {
    fn from(error: LockWaitError) -> Self {
        match error {
            LockWaitError::Cancelled(_) => Stop::Cancelled,
            other => Stop::Failed(RunError::Lock(other)),
        }
    }
}

/// Run up to `archive.total_iterations` iterations over the header snapshot.
///
/// Never returns an error directly: a fatal error ends the loop and is
/// reported through [`CoordinatorRun::status`] next to the records already gathered.
pub async fn run_coordinator(ctx: &RunContext, headers: &[ArchiveHeader]) -> CoordinatorRun {
    let total = ctx.archive.total_iterations;
    let mut records = Vec::new();

    tracing::info!(
        iterations = total,
        tables = headers.len(),
        increment = ctx.archive.increment_value,
        lock_key = %ctx.lock.key(),
        "Starting coordinator"
    );

    for index in 1..=total {
        match run_iteration(ctx, headers, index).await {
            Ok(record) => {
                tracing::info!(
                    iteration = index,
                    of = total,
                    duration_secs = record.duration.as_secs_f64(),
                    "Iteration complete"
                );
                records.push(record);
            }
            Err(Stop::Cancelled) => {
                tracing::warn!(
                    iteration = index,
                    completed = records.len(),
                    "Coordinator cancelled"
                );
                return CoordinatorRun {
                    records,
                    status: RunStatus::Cancelled,
                };
            }
            Err(Stop::Failed(e)) => {
                tracing::error!(
                    iteration = index,
                    completed = records.len(),
                    error = %e,
                    "Coordinator stopped on fatal error"
                );
                return CoordinatorRun {
                    records,
                    status: RunStatus::Failed(e),
                };
            }
        }
    }

    CoordinatorRun {
        records,
        status: RunStatus::Completed,
    }
}

async fn run_iteration(
    ctx: &RunContext,
    headers: &[ArchiveHeader],
    index: u32,
) -> Result<IterationRecord, Stop> {
    ctx.lock.wait_for_release(&ctx.cancel).await?;

    let started_at = Utc::now();
    let started = Instant::now();

    bump_boundaries(ctx, headers)
        .await
        .map_err(|e| Stop::Failed(RunError::Db(e)))?;

    if ctx.cancel.is_cancelled() {
        return Err(Stop::Cancelled);
    }

    match ctx.trigger.fire().await {
        Ok(outcome) if outcome.is_success() => {
            tracing::info!(
                iteration = index,
                status = outcome.status,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Archival worker triggered"
            );
        }
        Ok(outcome) => {
            tracing::warn!(
                iteration = index,
                status = outcome.status,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Archival trigger returned non-success status"
            );
        }
        Err(e) => {
            tracing::error!(iteration = index, error = %e, "Archival trigger failed");
        }
    }

    ctx.lock.wait_for_release(&ctx.cancel).await?;

    Ok(IterationRecord {
        index,
        started_at,
        finished_at: Utc::now(),
        duration: started.elapsed(),
    })
}

/// Raise every header's boundary in a single transaction.
///
/// Headers without a boundary term get the default instead of an increment.
async fn bump_boundaries(ctx: &RunContext, headers: &[ArchiveHeader]) -> DbResult<()> {
    let mut tx = ctx.rules.begin().await?;

    for header in headers {
        let result = async {
            let next = match tx.boundary(header.id).await? {
                Some(current) => current.saturating_add(ctx.archive.increment_value),
                None => ctx.archive.default_min_id_value,
            };
            tx.upsert_boundary(header.id, next, LOOP_ACTOR).await?;
            Ok::<_, crate::db::DbError>(next)
        }
        .await;

        match result {
            Ok(next) => {
                tracing::debug!(
                    header_id = header.id,
                    table = %header.table_name,
                    boundary = next,
                    "Boundary raised"
                );
            }
            Err(e) => {
                tracing::error!(
                    header_id = header.id,
                    table = %header.table_name,
                    error = %e,
                    "Boundary update failed; rolling back"
                );
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after failed boundary update also failed");
                }
                return Err(e);
            }
        }
    }

    tx.commit().await
}
