//! One-shot boundary initialization.
//!
//! For each auto-archive header the boundary becomes the lowest id among rows
//! that match every static term and were created before the retention
//! threshold. Tables with no such rows get the configured default.
//!
//! All headers share one transaction. Each header runs inside its own
//! savepoint, so a table whose rules or schema are broken is skipped without
//! leaving a partial write, while the others still commit.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use super::RunContext;
use crate::{
    db::{ArchiveRuleTx, DbError, DbResult, filter::{Dialect, FilterBuilder}},
    models::{ArchiveHeader, ArchiveTerm, BoundaryWrite, CREATED_COLUMN, INIT_ACTOR},
};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not read archive headers: {0}")]
    Headers(#[source] DbError),

    #[error("database unavailable while initializing {table}: {source}")]
    Connectivity {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("initialization transaction failed: {0}")]
    Transaction(#[source] DbError),
}

/// How a boundary value was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    /// `MIN(id)` over the matching rows.
    MinId,
    /// Matching rows exist but `MIN(id)` was null; the lowest non-null id from an ordered scan.
    FallbackScan,
    /// No matching rows.
    Default,
}

impl fmt::Display for BoundarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoundarySource::MinId => "min id",
            BoundarySource::FallbackScan => "fallback scan",
            BoundarySource::Default => "default",
        })
    }
}

/// Per-table result of the initializer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Set {
        header_id: i64,
        table: String,
        boundary: i64,
        source: BoundarySource,
        write: BoundaryWrite,
    },
    Failed {
        header_id: i64,
        table: String,
        error: String,
    },
}

/// Result of one initializer pass.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    /// Header snapshot the coordinator works from for the rest of the run.
    pub headers: Vec<ArchiveHeader>,
    pub outcomes: Vec<TableOutcome>,
    pub threshold_reference: NaiveDateTime,
}

impl InitReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TableOutcome::Set { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

impl fmt::Display for InitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Initialized {} of {} table(s)",
            self.succeeded(),
            self.outcomes.len()
        )?;
        for outcome in &self.outcomes {
            match outcome {
                TableOutcome::Set {
                    table,
                    boundary,
                    source,
                    ..
                } => writeln!(f, "  {table}: id < {boundary} ({source})")?,
                TableOutcome::Failed { table, error, .. } => {
                    writeln!(f, "  {table}: FAILED ({error})")?
                }
            }
        }
        Ok(())
    }
}

/// Compute and store the initial boundary of every auto-archive table.
///
/// `now` is the local wall-clock time the retention thresholds are measured from.
pub async fn initialize_boundaries(
    ctx: &RunContext,
    now: NaiveDateTime,
) -> Result<InitReport, InitError> {
    let headers = ctx
        .rules
        .list_auto_archive_headers()
        .await
        .map_err(InitError::Headers)?;

    if headers.is_empty() {
        tracing::warn!("No auto-archive headers found; nothing to initialize");
        return Ok(InitReport {
            headers,
            outcomes: Vec::new(),
            threshold_reference: now,
        });
    }

    tracing::info!(tables = headers.len(), "Initializing archive boundaries");

    let dialect = ctx.rules.dialect();
    let mut tx = ctx.rules.begin().await.map_err(InitError::Transaction)?;
    let mut outcomes = Vec::with_capacity(headers.len());

    for header in &headers {
        let savepoint = format!("init_header_{}", header.id);
        tx.savepoint(&savepoint)
            .await
            .map_err(InitError::Transaction)?;

        let threshold = header.retention_threshold(now, ctx.archive.default_retention_days);
        let result = initialize_one(
            tx.as_mut(),
            dialect,
            header,
            threshold,
            ctx.archive.default_min_id_value,
        )
        .await;

        match result {
            Ok((boundary, source, write)) => {
                tx.release_savepoint(&savepoint)
                    .await
                    .map_err(InitError::Transaction)?;

                tracing::info!(
                    header_id = header.id,
                    table = %header.table_name,
                    threshold = %threshold,
                    boundary,
                    source = %source,
                    "Boundary initialized"
                );

                outcomes.push(TableOutcome::Set {
                    header_id: header.id,
                    table: header.table_name.clone(),
                    boundary,
                    source,
                    write,
                });
            }
            Err(e) if e.is_connectivity() => {
                return Err(InitError::Connectivity {
                    table: header.table_name.clone(),
                    source: e,
                });
            }
            Err(e) => {
                tx.rollback_to_savepoint(&savepoint)
                    .await
                    .map_err(InitError::Transaction)?;
                tx.release_savepoint(&savepoint)
                    .await
                    .map_err(InitError::Transaction)?;

                tracing::error!(
                    header_id = header.id,
                    table = %header.table_name,
                    error = %e,
                    "Failed to initialize boundary; skipping table"
                );

                outcomes.push(TableOutcome::Failed {
                    header_id: header.id,
                    table: header.table_name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    tx.commit().await.map_err(InitError::Transaction)?;

    let report = InitReport {
        headers,
        outcomes,
        threshold_reference: now,
    };

    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Boundary initialization committed"
    );

    Ok(report)
}

async fn initialize_one(
    tx: &mut dyn ArchiveRuleTx,
    dialect: Dialect,
    header: &ArchiveHeader,
    threshold: NaiveDateTime,
    default_boundary: i64,
) -> DbResult<(i64, BoundarySource, BoundaryWrite)> {
    let (boundary, source) =
        derive_boundary(tx, dialect, header, threshold, default_boundary).await?;
    let write = tx.upsert_boundary(header.id, boundary, INIT_ACTOR).await?;
    Ok((boundary, source, write))
}

async fn derive_boundary(
    tx: &mut dyn ArchiveRuleTx,
    dialect: Dialect,
    header: &ArchiveHeader,
    threshold: NaiveDateTime,
    default_boundary: i64,
) -> DbResult<(i64, BoundarySource)> {
    let schema = tx.describe_table(&header.table_name).await?;
    let terms = tx.static_terms(header.id).await?;

    let mut builder = FilterBuilder::new(&schema, dialect);
    for term in terms
        .iter()
        .filter(|t| !ArchiveTerm::is_boundary_field(&t.field))
    {
        builder = builder.term(&term.field, &term.operator, &term.value)?;
    }
    let filter = builder.before(CREATED_COLUMN, threshold)?.build();

    tracing::debug!(
        table = %header.table_name,
        predicate = %filter.where_clause,
        "Computing initial boundary"
    );

    if let Some(min_id) = tx.min_id(&schema, &filter).await? {
        return Ok((min_id, BoundarySource::MinId));
    }

    if tx.count_rows(&schema, &filter).await? == 0 {
        return Ok((default_boundary, BoundarySource::Default));
    }

    match tx.first_id(&schema, &filter).await? {
        Some(id) => Ok((id, BoundarySource::FallbackScan)),
        None => Ok((default_boundary, BoundarySource::Default)),
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::NaiveDate;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        archive::RunContext,
        config::{ArchiveConfig, RuleTablesConfig},
        db::{
            ArchiveRuleRepo,
            sqlite::SqliteArchiveRuleRepo,
            tests::harness::{TestPool, migrated_sqlite_pool},
        },
        lock::{LockWaiter, MemoryLockProbe},
        trigger::{ArchiveTrigger, TriggerError, TriggerOutcome},
    };

    struct NeverTrigger;

    #[async_trait::async_trait]
    impl ArchiveTrigger for NeverTrigger {
        async fn fire(&self) -> Result<TriggerOutcome, TriggerError> {
            panic!("initializer must not trigger the worker");
        }
    }

    async fn setup() -> (RunContext, TestPool) {
        let pool = migrated_sqlite_pool().await;
        let repo: Arc<dyn ArchiveRuleRepo> = Arc::new(SqliteArchiveRuleRepo::new(
            pool.clone(),
            &RuleTablesConfig::default(),
        ));
        let ctx = RunContext {
            rules: repo,
            lock: LockWaiter::new(
                Arc::new(MemoryLockProbe::new()),
                "archive:lock",
                Duration::from_millis(10),
                None,
            ),
            trigger: Arc::new(NeverTrigger),
            archive: ArchiveConfig::default(),
            cancel: CancellationToken::new(),
        };
        (ctx, TestPool::Sqlite(pool))
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(14, 35, 0)
            .unwrap()
    }

    async fn boundary_of(db: &TestPool, header_id: i64) -> i64 {
        db.scalar(&format!(
            r#"SELECT CAST(value AS BIGINT) FROM archive_rule_term WHERE "headerId" = {header_id} AND field = 'id'"#
        ))
        .await
    }

    const ORDERS: &str = r#"
        CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT, created TIMESTAMP);
        INSERT INTO orders (id, status, created) VALUES
            (2, 'CLOSED', '2023-01-02 08:00:00'),
            (3, 'OPEN',   '2023-01-02 08:00:00'),
            (5, 'CLOSED', '2023-03-04 08:00:00'),
            (9, 'CLOSED', '2023-05-06 08:00:00'),
            (12, 'CLOSED', '2024-07-01 08:00:00');
    "#;

    #[tokio::test]
    async fn test_min_id_under_static_terms_and_retention() {
        let (ctx, db) = setup().await;
        db.exec(ORDERS).await;
        db.exec(
            r#"
            INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore")
                VALUES ('orders', 1, 30);
            INSERT INTO archive_rule_term ("headerId", field, operator, value)
                VALUES (1, 'status', '=', ' ''CLOSED'' ');
            "#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(
            report.outcomes[0],
            TableOutcome::Set {
                header_id: 1,
                table: "orders".into(),
                boundary: 2,
                source: BoundarySource::MinId,
                write: BoundaryWrite::Inserted,
            }
        );
        assert_eq!(boundary_of(&db, 1).await, 2);
    }

    #[tokio::test]
    async fn test_default_when_no_rows_qualify() {
        let (ctx, db) = setup().await;
        db.exec(
            r#"
            CREATE TABLE shipments (id INTEGER PRIMARY KEY, created TIMESTAMP);
            INSERT INTO archive_rule_header ("tableName", "autoArchive") VALUES ('shipments', 1);
            "#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();

        assert!(matches!(
            report.outcomes[0],
            TableOutcome::Set {
                boundary: 10_000,
                source: BoundarySource::Default,
                ..
            }
        ));
        assert_eq!(boundary_of(&db, 1).await, 10_000);
    }

    #[tokio::test]
    async fn test_rows_newer_than_threshold_are_ignored() {
        let (ctx, db) = setup().await;
        db.exec(
            r#"
            CREATE TABLE shipments (id INTEGER PRIMARY KEY, created TIMESTAMP);
            INSERT INTO shipments (id, created) VALUES (40, '2024-07-10 00:00:00');
            INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore")
                VALUES ('shipments', 1, 30);
            "#,
        )
        .await;

        initialize_boundaries(&ctx, now()).await.unwrap();
        assert_eq!(boundary_of(&db, 1).await, 10_000);
    }

    #[tokio::test]
    async fn test_rows_without_ids_fall_back_to_default() {
        let (ctx, db) = setup().await;
        db.exec(
            r#"
            CREATE TABLE legacy (id TEXT, created TIMESTAMP);
            INSERT INTO legacy (id, created) VALUES (NULL, '2020-01-01 00:00:00');
            INSERT INTO archive_rule_header ("tableName", "autoArchive") VALUES ('legacy', 1);
            "#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();

        // Rows exist, MIN(id) is null and the scan finds no non-null id.
        assert!(matches!(
            report.outcomes[0],
            TableOutcome::Set {
                boundary: 10_000,
                source: BoundarySource::Default,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_initializer_is_idempotent() {
        let (ctx, db) = setup().await;
        db.exec(ORDERS).await;
        db.exec(
            r#"
            INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore")
                VALUES ('orders', 1, 30);
            INSERT INTO archive_rule_term ("headerId", field, operator, value)
                VALUES (1, 'status', '=', 'CLOSED');
            "#,
        )
        .await;

        initialize_boundaries(&ctx, now()).await.unwrap();
        let second = initialize_boundaries(&ctx, now()).await.unwrap();

        assert!(matches!(
            second.outcomes[0],
            TableOutcome::Set {
                boundary: 2,
                write: BoundaryWrite::Updated,
                ..
            }
        ));
        let boundary_terms = db
            .scalar(r#"SELECT COUNT(*) FROM archive_rule_term WHERE "headerId" = 1 AND field = 'id'"#)
            .await;
        assert_eq!(boundary_terms, 1);
        assert_eq!(boundary_of(&db, 1).await, 2);
    }

    #[tokio::test]
    async fn test_existing_boundary_term_is_not_a_static_filter() {
        let (ctx, db) = setup().await;
        db.exec(ORDERS).await;
        db.exec(
            r#"
            INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore")
                VALUES ('orders', 1, 30);
            INSERT INTO archive_rule_term ("headerId", field, operator, value)
                VALUES (1, 'ID', '<', '1');
            "#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();

        // id < 1 would match nothing; ignoring it yields the true minimum.
        assert!(matches!(
            report.outcomes[0],
            TableOutcome::Set { boundary: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_broken_table_is_skipped_and_others_commit() {
        let (ctx, db) = setup().await;
        db.exec(ORDERS).await;
        db.exec(
            r#"
            INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore") VALUES
                ('missing_table', 1, 30),
                ('orders', 1, 30),
                ('orders', 1, 30);
            INSERT INTO archive_rule_term ("headerId", field, operator, value) VALUES
                (3, 'no_such_column', '=', 'x');
            "#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert!(matches!(&report.outcomes[0], TableOutcome::Failed { table, .. } if table == "missing_table"));
        assert!(matches!(&report.outcomes[2], TableOutcome::Failed { error, .. } if error.contains("no_such_column")));

        let terms = db
            .scalar(r#"SELECT COUNT(*) FROM archive_rule_term WHERE field = 'id'"#)
            .await;
        assert_eq!(terms, 1);
        assert_eq!(boundary_of(&db, 2).await, 2);
    }

    #[tokio::test]
    async fn test_no_headers() {
        let (ctx, _db) = setup().await;
        let report = initialize_boundaries(&ctx, now()).await.unwrap();
        assert!(report.headers.is_empty());
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_report_display() {
        let (ctx, db) = setup().await;
        db.exec(ORDERS).await;
        db.exec(
            r#"INSERT INTO archive_rule_header ("tableName", "autoArchive", "archiveDaysBefore") VALUES ('orders', 1, 30);"#,
        )
        .await;

        let report = initialize_boundaries(&ctx, now()).await.unwrap();
        let rendered = report.to_string();

        assert!(rendered.contains("Initialized 1 of 1 table(s)"), "{rendered}");
        assert!(rendered.contains("orders: id < 2 (min id)"), "{rendered}");
    }
}
