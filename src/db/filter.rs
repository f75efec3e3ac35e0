//! Rule term to SQL translation
//!
//! Archive rule terms are stored as free-form `(field, operator, value)` rows.
//! This module turns them into a parameterized WHERE clause for the table the
//! rule belongs to:
//!
//! - Column names are checked against the table's catalog (an allow-list) and
//!   rendered with the catalog's own spelling, quoted for the target dialect
//!   (double quotes, or backticks on MySQL).
//! - Operators must be one of `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`, `LIKE`, `NOT LIKE`.
//! - Values are never interpolated. They are trimmed, stripped of surrounding
//!   quotes, coerced to the column's type and bound as parameters.
//!
//! An empty filter renders as `1=1` so callers can always append `WHERE`.

use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Errors raised while translating rule terms.
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("table {0:?} does not exist or has no columns")]
    UnknownTable(String),

    #[error("column {column:?} does not exist on table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("unsupported operator {0:?}")]
    UnsupportedOperator(String),

    #[error("value {value:?} for column {column:?} is not a valid {kind}")]
    InvalidValue {
        column: String,
        value: String,
        kind: ColumnKind,
    },
}

/// Placeholder and identifier-quoting style of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders, double-quoted identifiers.
    Sqlite,
    /// `$1`, `$2`, ... placeholders, double-quoted identifiers.
    Postgres,
    /// `?` placeholders, backtick-quoted identifiers.
    Mysql,
}

impl Dialect {
    fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => quote_ident(name),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }
}

/// Coarse column type, used to coerce stored term values before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Bool,
    Timestamp,
    Text,
}

impl ColumnKind {
    /// Classify a declared column type as reported by the catalog
    /// (`pragma_table_info.type` or `information_schema.columns.data_type`).
    pub fn from_declared_type(declared: &str) -> Self {
        let ty = declared.to_ascii_uppercase();
        if (ty.contains("INT") && !ty.contains("POINT") && !ty.contains("INTERVAL"))
            || ty.contains("SERIAL")
        {
            ColumnKind::Integer
        } else if ty.contains("BOOL") {
            ColumnKind::Bool
        } else if ty.contains("DATE") || ty.contains("TIME") {
            ColumnKind::Timestamp
        } else if ty.contains("REAL")
            || ty.contains("FLOA")
            || ty.contains("DOUB")
            || ty.contains("NUMERIC")
            || ty.contains("DECIMAL")
        {
            ColumnKind::Real
        } else {
            ColumnKind::Text
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "number",
            ColumnKind::Bool => "boolean",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

/// Column allow-list for one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Build a schema from catalog rows. An empty column list means the table
    /// does not exist.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnInfo>) -> Result<Self, FilterError> {
        let table = table.into();
        if columns.is_empty() {
            return Err(FilterError::UnknownTable(table));
        }
        Ok(Self { table, columns })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Look up a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Result<&ColumnInfo, FilterError> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| FilterError::UnknownColumn {
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    /// Quoted table name for use in a FROM clause.
    pub fn quoted_table(&self, dialect: Dialect) -> String {
        dialect.quote_ident(&self.table)
    }
}

/// Quote an identifier with ANSI double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Comparison operators allowed in rule terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
        }
    }

    fn is_pattern(self) -> bool {
        matches!(self, CompareOp::Like | CompareOp::NotLike)
    }
}

impl FromStr for CompareOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" => Ok(CompareOp::Eq),
            "!=" | "<>" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "LIKE" => Ok(CompareOp::Like),
            "NOT LIKE" => Ok(CompareOp::NotLike),
            _ => Err(FilterError::UnsupportedOperator(s.to_string())),
        }
    }
}

/// SQL bind value types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

/// Result of translating rule terms.
#[derive(Debug, Clone)]
pub struct SqlFilter {
    /// SQL WHERE clause fragment (e.g., `"status" = ? AND "created" < ?`)
    pub where_clause: String,
    /// Bind values in order
    pub bindings: Vec<SqlValue>,
}

/// Builds a conjunctive WHERE clause against one table.
pub struct FilterBuilder<'a> {
    schema: &'a TableSchema,
    dialect: Dialect,
    clauses: Vec<String>,
    bindings: Vec<SqlValue>,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(schema: &'a TableSchema, dialect: Dialect) -> Self {
        Self {
            schema,
            dialect,
            clauses: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Add a `field operator value` term as stored in the rule table.
    pub fn term(mut self, field: &str, operator: &str, raw_value: &str) -> Result<Self, FilterError> {
        let column = self.schema.column(field)?;
        let op: CompareOp = operator.parse()?;
        let value = normalize_value(raw_value);

        let bound = if op.is_pattern() {
            SqlValue::Text(value.to_string())
        } else {
            coerce(column, value)?
        };

        let clause = format!(
            "{} {} {}",
            self.dialect.quote_ident(&column.name),
            op.as_sql(),
            self.dialect.placeholder(self.bindings.len() + 1)
        );
        self.clauses.push(clause);
        self.bindings.push(bound);
        Ok(self)
    }

    /// Add `column < threshold`.
    pub fn before(mut self, column: &str, threshold: NaiveDateTime) -> Result<Self, FilterError> {
        let column = self.schema.column(column)?;
        let clause = format!(
            "{} < {}",
            self.dialect.quote_ident(&column.name),
            self.dialect.placeholder(self.bindings.len() + 1)
        );
        self.clauses.push(clause);
        self.bindings.push(SqlValue::Timestamp(threshold));
        Ok(self)
    }

    pub fn build(self) -> SqlFilter {
        let where_clause = if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        };
        SqlFilter {
            where_clause,
            bindings: self.bindings,
        }
    }
}

/// Trim whitespace and any surrounding quote characters.
fn normalize_value(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

fn coerce(column: &ColumnInfo, value: &str) -> Result<SqlValue, FilterError> {
    let invalid = || FilterError::InvalidValue {
        column: column.name.clone(),
        value: value.to_string(),
        kind: column.kind,
    };

    match column.kind {
        ColumnKind::Integer => value.parse().map(SqlValue::Int).map_err(|_| invalid()),
        ColumnKind::Real => value.parse().map(SqlValue::Float).map_err(|_| invalid()),
        ColumnKind::Bool => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "y" | "yes" => Ok(SqlValue::Bool(true)),
            "0" | "false" | "f" | "n" | "no" => Ok(SqlValue::Bool(false)),
            _ => Err(invalid()),
        },
        ColumnKind::Timestamp => parse_timestamp(value)
            .map(SqlValue::Timestamp)
            .ok_or_else(invalid),
        ColumnKind::Text => Ok(SqlValue::Text(value.to_string())),
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn orders() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnInfo { name: "id".into(), kind: ColumnKind::Integer },
                ColumnInfo { name: "status".into(), kind: ColumnKind::Text },
                ColumnInfo { name: "warehouseId".into(), kind: ColumnKind::Integer },
                ColumnInfo { name: "weight".into(), kind: ColumnKind::Real },
                ColumnInfo { name: "closed".into(), kind: ColumnKind::Bool },
                ColumnInfo { name: "created".into(), kind: ColumnKind::Timestamp },
            ],
        )
        .unwrap()
    }

    fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[rstest]
    #[case("=", CompareOp::Eq)]
    #[case("!=", CompareOp::Ne)]
    #[case("<>", CompareOp::Ne)]
    #[case("<", CompareOp::Lt)]
    #[case("<=", CompareOp::Le)]
    #[case(">", CompareOp::Gt)]
    #[case(">=", CompareOp::Ge)]
    #[case("like", CompareOp::Like)]
    #[case(" NOT   LIKE ", CompareOp::NotLike)]
    fn test_parse_operator(#[case] input: &str, #[case] expected: CompareOp) {
        assert_eq!(input.parse::<CompareOp>().unwrap(), expected);
    }

    #[rstest]
    #[case("IN")]
    #[case("; DROP TABLE orders")]
    #[case("")]
    fn test_reject_operator(#[case] input: &str) {
        assert!(matches!(
            input.parse::<CompareOp>(),
            Err(FilterError::UnsupportedOperator(_))
        ));
    }

    #[rstest]
    #[case("INTEGER", ColumnKind::Integer)]
    #[case("bigint", ColumnKind::Integer)]
    #[case("double precision", ColumnKind::Real)]
    #[case("NUMERIC(10,2)", ColumnKind::Real)]
    #[case("boolean", ColumnKind::Bool)]
    #[case("timestamp without time zone", ColumnKind::Timestamp)]
    #[case("DATETIME", ColumnKind::Timestamp)]
    #[case("character varying", ColumnKind::Text)]
    #[case("", ColumnKind::Text)]
    fn test_column_kind(#[case] declared: &str, #[case] expected: ColumnKind) {
        assert_eq!(ColumnKind::from_declared_type(declared), expected);
    }

    #[test]
    fn test_empty_filter() {
        let schema = orders();
        let filter = FilterBuilder::new(&schema, Dialect::Sqlite).build();
        assert_eq!(filter.where_clause, "1=1");
        assert!(filter.bindings.is_empty());
    }

    #[test]
    fn test_terms_with_threshold_sqlite() {
        let schema = orders();
        let threshold = midnight(2024, 1, 1);
        let filter = FilterBuilder::new(&schema, Dialect::Sqlite)
            .term("STATUS", "=", " 'CLOSED' ")
            .unwrap()
            .term("warehouseid", "<>", "\"7\"")
            .unwrap()
            .before("created", threshold)
            .unwrap()
            .build();

        assert_eq!(
            filter.where_clause,
            r#""status" = ? AND "warehouseId" <> ? AND "created" < ?"#
        );
        assert_eq!(
            filter.bindings,
            vec![
                SqlValue::Text("CLOSED".into()),
                SqlValue::Int(7),
                SqlValue::Timestamp(threshold),
            ]
        );
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let schema = orders();
        let filter = FilterBuilder::new(&schema, Dialect::Postgres)
            .term("status", "LIKE", "CLOSED%")
            .unwrap()
            .before("created", midnight(2024, 1, 1))
            .unwrap()
            .build();

        assert_eq!(filter.where_clause, r#""status" LIKE $1 AND "created" < $2"#);
    }

    #[test]
    fn test_mysql_uses_backticks_and_question_marks() {
        let schema = orders();
        let filter = FilterBuilder::new(&schema, Dialect::Mysql)
            .term("warehouseid", "=", "7")
            .unwrap()
            .before("created", midnight(2024, 1, 1))
            .unwrap()
            .build();

        assert_eq!(filter.where_clause, "`warehouseId` = ? AND `created` < ?");
        assert_eq!(schema.quoted_table(Dialect::Mysql), "`orders`");
        assert_eq!(schema.quoted_table(Dialect::Postgres), "\"orders\"");
    }

    #[test]
    fn test_value_coercion() {
        let schema = orders();
        let filter = FilterBuilder::new(&schema, Dialect::Sqlite)
            .term("weight", ">", "1.5")
            .unwrap()
            .term("closed", "=", "true")
            .unwrap()
            .term("created", ">=", "2023-06-30")
            .unwrap()
            .build();

        assert_eq!(
            filter.bindings,
            vec![
                SqlValue::Float(1.5),
                SqlValue::Bool(true),
                SqlValue::Timestamp(midnight(2023, 6, 30)),
            ]
        );
    }

    #[test]
    fn test_unknown_column_rejected() {
        let schema = orders();
        let err = FilterBuilder::new(&schema, Dialect::Sqlite)
            .term("status\" OR 1=1 --", "=", "x")
            .err()
            .unwrap();
        assert!(matches!(err, FilterError::UnknownColumn { .. }));
    }

    #[test]
    fn test_bad_integer_rejected() {
        let schema = orders();
        let err = FilterBuilder::new(&schema, Dialect::Sqlite)
            .term("warehouseId", "=", "north")
            .err()
            .unwrap();
        assert_eq!(
            err,
            FilterError::InvalidValue {
                column: "warehouseId".into(),
                value: "north".into(),
                kind: ColumnKind::Integer,
            }
        );
    }

    #[test]
    fn test_missing_table() {
        assert_eq!(
            TableSchema::new("ghost", vec![]).unwrap_err(),
            FilterError::UnknownTable("ghost".into())
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::Mysql.quote_ident("we`ird"), "`we``ird`");
    }
}
