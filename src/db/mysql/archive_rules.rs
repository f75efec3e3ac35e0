use async_trait::async_trait;
use sqlx::{Executor, MySql, MySqlPool, Row, Transaction};

use crate::{
    config::RuleTablesConfig,
    db::{
        error::DbResult,
        filter::{ColumnInfo, ColumnKind, Dialect, SqlFilter, SqlValue, TableSchema},
        repos::{ArchiveRuleRepo, ArchiveRuleTx, parse_boundary_value},
    },
    models::{ArchiveHeader, ArchiveTerm, BOUNDARY_FIELD, BOUNDARY_OPERATOR, BoundaryWrite},
};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, <MySql as sqlx::Database>::Arguments<'q>>;

fn bind_filter<'q>(mut query: MySqlQuery<'q>, filter: &'q SqlFilter) -> MySqlQuery<'q> {
    for value in &filter.bindings {
        query = match value {
            SqlValue::Int(n) => query.bind(*n),
            SqlValue::Float(n) => query.bind(*n),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn quote(name: &str) -> String {
    Dialect::Mysql.quote_ident(name)
}

pub struct MysqlArchiveRuleRepo {
    pool: MySqlPool,
    header_table: String,
    term_table: String,
}

impl MysqlArchiveRuleRepo {
    pub fn new(pool: MySqlPool, tables: &RuleTablesConfig) -> Self {
        Self {
            pool,
            header_table: quote(&tables.header_table),
            term_table: quote(&tables.term_table),
        }
    }
}

#[async_trait]
impl ArchiveRuleRepo for MysqlArchiveRuleRepo {
    async fn list_auto_archive_headers(&self) -> DbResult<Vec<ArchiveHeader>> {
        // Integer widths differ between installations; normalize to BIGINT.
        let query = format!(
            r#"
            SELECT CAST(id AS SIGNED) AS id,
                   CAST(`tableName` AS CHAR) AS `tableName`,
                   CAST(`archiveDaysBefore` AS SIGNED) AS `archiveDaysBefore`
            FROM {}
            WHERE `autoArchive` = 1
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
        Ok(Box::new(MysqlArchiveRuleTx {
            tx,
            term_table: self.term_table.clone(),
        }))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }
}

pub struct MysqlArchiveRuleTx {
    tx: Transaction<'static, MySql>,
    term_table: String,
}

impl MysqlArchiveRuleTx {
    /// Row id of the boundary term, locked for the rest of the transaction.
    async fn boundary_row(&mut self, header_id: i64) -> DbResult<Option<i64>> {
        let query = format!(
            r#"
            SELECT CAST(id AS SIGNED) AS id
            FROM {}
            WHERE `headerId` = ? AND LOWER(TRIM(`field`)) = ? AND TRIM(`operator`) = ?
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
            self.term_table
        );

        let row = sqlx::query(&query)
            .bind(header_id)
            .bind(BOUNDARY_FIELD)
            .bind(BOUNDARY_OPERATOR)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|r| r.get("id")))
    }

    /// Transaction control statements go over the text protocol.
    async fn exec_text(&mut self, sql: String) -> DbResult<()> {
        (&mut *self.tx).execute(sql.as_str()).await?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveRuleTx for MysqlArchiveRuleTx {
    async fn static_terms(&mut self, header_id: i64) -> DbResult<Vec<ArchiveTerm>> {
        let query = format!(
            r#"
            SELECT CAST(`headerId` AS SIGNED) AS `headerId`,
                   CAST(`field` AS CHAR) AS `field`,
                   CAST(`operator` AS CHAR) AS `operator`,
                   CAST(`value` AS CHAR) AS `value`
            FROM {}
            WHERE `headerId` = ? AND LOWER(TRIM(`field`)) <> ?
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
            SELECT CAST(`value` AS CHAR) AS `value`
            FROM {}
            WHERE `headerId` = ? AND LOWER(TRIM(`field`)) = ? AND TRIM(`operator`) = ?
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
        // MySQL reports changed rows rather than matched rows for UPDATE, so
        // an unchanged value cannot be told apart from a missing term.
        if let Some(term_id) = self.boundary_row(header_id).await? {
            let update = format!(
                r#"
                UPDATE {}
                SET `value` = ?, `lastUpdated` = NOW(), `lastUpdatedBy` = ?
                WHERE id = ?
                "#,
                self.term_table
            );

            sqlx::query(&update)
                .bind(value.to_string())
                .bind(actor)
                .bind(term_id)
                .execute(&mut *self.tx)
                .await?;

            return Ok(BoundaryWrite::Updated);
        }

        let insert = format!(
            r#"
            INSERT INTO {} (`headerId`, `field`, `operator`, `value`, created, `lastUpdated`, `createdBy`, `lastUpdatedBy`)
            VALUES (?, ?, ?, ?, NOW(), NOW(), ?, ?)
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
        let rows = sqlx::query(
            r#"
            SELECT CAST(table_name AS CHAR) AS table_name,
                   CAST(column_name AS CHAR) AS column_name,
                   CAST(data_type AS CHAR) AS data_type
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND LOWER(table_name) = LOWER(?)
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.tx)
        .await?;

        // Table names are case-sensitive on some platforms; use the catalog's spelling.
        let catalog_name = rows
            .first()
            .map(|row| row.get::<String, _>("table_name"))
            .unwrap_or_else(|| table.to_string());

        let columns = rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name"),
                kind: ColumnKind::from_declared_type(&row.get::<String, _>("data_type")),
            })
            .collect();

        Ok(TableSchema::new(catalog_name, columns)?)
    }

    async fn min_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>> {
        let id = quote(&schema.column(BOUNDARY_FIELD)?.name);
        let query = format!(
            "SELECT CAST(MIN({id}) AS SIGNED) AS min_id FROM {} WHERE {}",
            schema.quoted_table(Dialect::Mysql),
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
            schema.quoted_table(Dialect::Mysql),
            filter.where_clause
        );

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(row.get("n"))
    }

    async fn first_id(&mut self, schema: &TableSchema, filter: &SqlFilter) -> DbResult<Option<i64>> {
        let id = quote(&schema.column(BOUNDARY_FIELD)?.name);
        let query = format!(
            "SELECT CAST({id} AS SIGNED) AS first_id FROM {} WHERE ({}) AND {id} IS NOT NULL ORDER BY {id} ASC LIMIT 1",
            schema.quoted_table(Dialect::Mysql),
            filter.where_clause
        );

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.and_then(|r| r.get("first_id")))
    }

    async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        self.exec_text(format!("SAVEPOINT {}", quote(name))).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.exec_text(format!("ROLLBACK TO SAVEPOINT {}", quote(name)))
            .await
    }

    async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.exec_text(format!("RELEASE SAVEPOINT {}", quote(name)))
            .await
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
