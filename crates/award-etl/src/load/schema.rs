//! Table descriptions and SQL generation for the destination store
//!
//! Statements use `$N` placeholders and `ON CONFLICT ... DO UPDATE`, which
//! both PostgreSQL and SQLite accept, so one description serves either
//! backend.

use award_etl_common::coerce::format_timestamp;
use chrono::NaiveDateTime;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    /// Stored as `YYYY-MM-DD HH:MM:SS` text
    Timestamp,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// A destination table: column order is the bind order of record values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// Logical identity; empty means plain inserts
    pub key_columns: &'static [&'static str],
}

impl TableSpec {
    fn is_key(&self, column: &str) -> bool {
        self.key_columns.contains(&column)
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Single-row write statement for this table
    pub fn upsert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            self.column_list(),
            placeholders
        );

        if self.key_columns.is_empty() {
            return sql;
        }

        let updates = self
            .columns
            .iter()
            .filter(|c| !self.is_key(c.name))
            .map(|c| format!("{0} = excluded.{0}", c.name))
            .collect::<Vec<_>>();

        sql.push_str(&format!(" ON CONFLICT ({})", self.key_columns.join(", ")));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
        sql
    }

    /// `CREATE TABLE` plus the unique index backing the upsert conflict target
    pub fn create_statements(&self) -> Vec<String> {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let not_null = if self.is_key(c.name) { " NOT NULL" } else { "" };
                format!("{} {}{}", c.name, c.ty.sql_type(), not_null)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name, columns
        )];

        if !self.key_columns.is_empty() {
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS ux_{0}_key ON {0} ({1})",
                self.name,
                self.key_columns.join(", ")
            ));
        }
        statements
    }
}

/// A typed, nullable value bound into a write statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Bool(Option<bool>),
    Timestamp(Option<NaiveDateTime>),
}

impl SqlValue {
    /// Timestamps as stored text
    pub fn timestamp_text(ts: &Option<NaiveDateTime>) -> Option<String> {
        ts.as_ref().map(format_timestamp)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(v: Option<f64>) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<&Option<String>> for SqlValue {
    fn from(v: &Option<String>) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<Option<bool>> for SqlValue {
    fn from(v: Option<bool>) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<NaiveDateTime>> for SqlValue {
    fn from(v: Option<NaiveDateTime>) -> Self {
        SqlValue::Timestamp(v)
    }
}
