use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::{
    config::RuleTablesConfig,
    db::{
        error::DbResult,
        filter::{ColumnInfo, ColumnKind, Dialect, SqlFilter, SqlValue, TableSchema, quote_ident},
        repos::{ArchiveRuleRepo, ArchiveRuleTx, parse_boundary_value},
    },
    models::{ArchiveHeader, ArchiveTerm, BOUNDARY_FIELD, BOUNDARY_OPERATOR, BoundaryWrite},
};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, <Sqlite as sqlx::Database>::Arguments<'q>>;

fn bind_filter<'q>(mut query: SqliteQuery<'q>, filter: &'q SqlFilter) -> SqliteQuery<'q> {
    for value in &filter.bindings {
        query = match value {
            SqlValue::Int(n) => query.bind(*n),
            SqlValue::Float(n) => query.bind(*n),
            SqlValue::Bool(b) => query.bind(*b as i32),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

pub struct SqliteArchiveRuleRepo {
    pool: SqlitePool,
    header_table: String,
    term_table: String,
}

impl SqliteArchiveRuleRepo {
    pub fn new(pool: SqlitePool, tables: &RuleTablesConfig) -> Self {
        Self {
            pool,
            header_table: quote_ident(&tables.header_table),
            term_table: quote_ident(&tables.term_table),
        }
    }
}

#[async_trait]
impl ArchiveRuleRepo for SqliteArchiveRuleRepo {
    async fn list_auto_archive_headers(&self) -> DbResult<Vec<ArchiveHeader>> {
        let query = format!(
            r#"
            SELECT id, "tableName", "archiveDaysBefore"
            FROM {}
            WHERE "autoArchive" = 1
            ORDER BY id
            "#,
            self.header_table
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| ArchiveHeader {
                id: row.get("id"),
                table_name: row.get("tableName"),
                auto_archive: true,
                archive_days_before: row
                    .get::<Option<i64>, _>("archiveDaysBefore")
                    .map(|d| d.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
            })
            .collect())
    }

    async fn begin(&self) -> DbResult<Box<dyn ArchiveRuleTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteArchiveRuleTx {
            tx,
            term_table: self.term_table.clone(),
        }))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

pub struct SqliteArchiveRuleTx {
    tx: Transaction<'static, Sqlite>,
    term_table: String,
}

#[async_trait]
impl ArchiveRuleTx for SqliteArchiveRuleTx {
    async fn static_terms(&mut self, header_id: i64) -> DbResult<Vec<ArchiveTerm>> {
        let query = format!(
            r#"
            SELECT "headerId", field, operator, value
            FROM {}
            WHERE "headerId" = ? AND LOWER(TRIM(field)) <> ?
            ORDER BY id
            "#,
            self.term_table
        );

        let rows = sqlx::query(&query)
            .bind(header_id)
            .bind(BOUNDARY_FIELD)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ArchiveTerm {
                header_id: row.get("headerId"),
                field: row.get("field"),
                operator: row.get("operator"),
                value: row.get::<Option<String>, _>("value").unwrap_or_default(),
            })
            .collect())
    }

    async fn boundary(&mut self, header_id: i64) -> DbResult<Option<i64>> {
        let query = format!(
            r#"
            SELECT value
            FROM {}
            WHERE "headerId" = ? AND LOWER(TRIM(field)) = ? AND TRIM(operator) = ?
            ORDER BY id
            LIMIT 1
            "#,
            self.term_table
        );

        let row = sqlx::query(&query)
            .bind(header_id)
            .bind(BOUNDARY_FIELD)
            .bind(BOUNDARY_OPERATOR)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row.and_then(|r| r.get::<Option<String>, _>("value")) {
            Some(raw) => parse_boundary_value(header_id, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn upsert_boundary(
        &mut self,
        header_id: i64,
        value: i64,
        actor: &str,
    ) -> DbResult<BoundaryWrite> {
        let update = format!(
            r#"
            UPDATE {}
            SET value = ?, "lastUpdated" = CURRENT_TIMESTAMP, "lastUpdatedBy" = ?
            WHERE "headerId" = ? AND LOWER(TRIM(field)) = ? AND TRIM(operator) = ?
            "#,
            self.term_table
        );

        let result = sqlx::query(&update)
            .bind(value.to_string())
            .bind(actor)
            .bind(header_id)
            .bind(BOUNDARY_FIELD)
            .bind(BOUNDARY_OPERATOR)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(BoundaryWrite::Updated);
        }

        let insert = format!(
            r#"
            INSERT INTO {} ("headerId", field, operator, value, created, "lastUpdated", "createdBy", "lastUpdatedBy")
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP, ?, ?)
            "#,
            self.term_table
        );

        sqlx::query(&insert)
            .bind(header_id)
            .bind(BOUNDARY_FIELD)
            .bind(BOUNDARY_OPERATOR)
            .bind(value.to_string())
            .bind(actor)
            .bind(actor)
            .execute(&mut *self.tx)
            .await?;

        Ok(BoundaryWrite::Inserted)
    }

    async fn describe_table(&mut self, table: &str) -> DbResult<TableSchema> {
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(&mut *self.tx)
            .await?;

        let columns = rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("name"),
                kind: ColumnKind::from_declared_type(&row.get::<String, _>("type")),
            })
            .collect();

        Ok(TableSchema::new(table, columns)?)
    }

    async fn min_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>> {
        let id = quote_ident(&schema.column(BOUNDARY_FIELD)?.name);
        let query = format!(
            "SELECT CAST(MIN({id}) AS INTEGER) AS min_id FROM {} WHERE {}",
            schema.quoted_table(Dialect::Sqlite),
            filter.where_clause
        );

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(row.get("min_id"))
    }

    async fn count_rows(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<i64> {
        let query = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {}",
            schema.quoted_table(Dialect::Sqlite),
            filter.where_clause
        );

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(row.get("n"))
    }

    async fn first_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>> {
        let id = quote_ident(&schema.column(BOUNDARY_FIELD)?.name);
        let query = format!(
            "SELECT CAST({id} AS INTEGER) AS first_id FROM {} WHERE ({}) AND {id} IS NOT NULL ORDER BY {id} ASC LIMIT 1",
            schema.quoted_table(Dialect::Sqlite),
            filter.where_clause
        );

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.and_then(|r| r.get("first_id")))
    }

    async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        let sql = format!("SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        let sql = format!("RELEASE SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
