//! Destination store abstraction and its SQL implementation

use super::schema::{Column, ColumnType, SqlValue, TableSpec};
use crate::entities::EntityKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    any::{AnyArguments, AnyPoolOptions},
    query::Query,
    Any, AnyPool,
};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Archival copy of one batch, tagged with the job that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub job_id: String,
    pub entity: EntityKind,
    pub award_code: Option<String>,
    pub record_count: usize,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl RawSnapshot {
    pub fn new(
        job_id: &str,
        entity: EntityKind,
        award_code: Option<String>,
        record_count: usize,
        payload: Value,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            entity,
            award_code,
            record_count,
            payload,
            created_at: Utc::now(),
        }
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.job_id.as_str().into(),
            self.entity.as_str().into(),
            (&self.award_code).into(),
            SqlValue::Int(i64::try_from(self.record_count).ok()),
            SqlValue::Text(Some(self.payload.to_string())),
            self.created_at.naive_utc().into(),
        ]
    }
}

/// Append-only archive of raw and loaded batches
pub const ARCHIVE_TABLE: &TableSpec = &TableSpec {
    name: "raw_api_responses",
    columns: &[
        Column::new("job_id", ColumnType::Text),
        Column::new("entity", ColumnType::Text),
        Column::new("award_code", ColumnType::Text),
        Column::new("record_count", ColumnType::Integer),
        Column::new("payload", ColumnType::Text),
        Column::new("created_at", ColumnType::Timestamp),
    ],
    key_columns: &[],
};

/// Where canonical records end up
#[async_trait]
pub trait Destination: Send + Sync {
    /// Create the table and its key index if missing
    async fn ensure_table(&self, table: &'static TableSpec) -> Result<(), sqlx::Error>;

    /// Write rows atomically: either every row is applied or none is
    async fn write_batch(
        &self,
        table: &'static TableSpec,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, sqlx::Error>;

    async fn archive(&self, snapshot: &RawSnapshot) -> Result<(), sqlx::Error>;
}

/// Failures worth retrying: connectivity, pool exhaustion, lock contention
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        // SQLITE_BUSY / SQLITE_LOCKED, serialization failure, deadlock
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("5") | Some("6") | Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}

/// [`Destination`] over any sqlx-supported URL (`postgres://`, `sqlite://`)
#[derive(Debug)]
pub struct SqlDestination {
    pool: AnyPool,
    ensured: Mutex<HashSet<&'static str>>,
}

impl SqlDestination {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self {
            pool,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Timestamp(v) => query.bind(SqlValue::timestamp_text(v)),
    }
}

#[async_trait]
impl Destination for SqlDestination {
    async fn ensure_table(&self, table: &'static TableSpec) -> Result<(), sqlx::Error> {
        let mut ensured = self.ensured.lock().await;
        if ensured.contains(table.name) {
            return Ok(());
        }

        for statement in table.create_statements() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        debug!(table = table.name, "Destination table ready");
        ensured.insert(table.name);
        Ok(())
    }

    #[instrument(skip(self, table, rows), fields(table = table.name, rows = rows.len()))]
    async fn write_batch(
        &self,
        table: &'static TableSpec,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, sqlx::Error> {
        let sql = table.upsert_sql();
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let query = row
                .iter()
                .fold(sqlx::query(&sql), |query, value| bind_value(query, value));
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn archive(&self, snapshot: &RawSnapshot) -> Result<(), sqlx::Error> {
        self.ensure_table(ARCHIVE_TABLE).await?;
        self.write_batch(ARCHIVE_TABLE, &[snapshot.values()]).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const WIDGETS: &TableSpec = &TableSpec {
        name: "widgets",
        columns: &[
            Column::new("widget_id", ColumnType::Integer),
            Column::new("award_code", ColumnType::Text),
            Column::new("amount", ColumnType::Float),
            Column::new("active", ColumnType::Boolean),
        ],
        key_columns: &["widget_id", "award_code"],
    };

    async fn destination(dir: &tempfile::TempDir) -> SqlDestination {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("dest.db").display());
        SqlDestination::connect(&url, 1).await.unwrap()
    }

    fn row(id: i64, amount: f64) -> Vec<SqlValue> {
        vec![
            id.into(),
            "MA000001".into(),
            Some(amount).into(),
            Some(true).into(),
        ]
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = destination(&dir).await;
        dest.ensure_table(WIDGETS).await.unwrap();

        dest.write_batch(WIDGETS, &[row(1, 10.0), row(2, 20.0)])
            .await
            .unwrap();
        dest.write_batch(WIDGETS, &[row(2, 25.5), row(3, 30.0)])
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);

        let amount: f64 = sqlx::query_scalar("SELECT amount FROM widgets WHERE widget_id = 2")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(amount, 25.5);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let dest = destination(&dir).await;
        dest.ensure_table(WIDGETS).await.unwrap();

        // second row violates NOT NULL on a key column
        let bad = vec![
            SqlValue::Int(None),
            "MA000001".into(),
            Some(1.0).into(),
            Some(false).into(),
        ];
        assert!(dest.write_batch(WIDGETS, &[row(1, 10.0), bad]).await.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_archive_appends() {
        let dir = tempfile::tempdir().unwrap();
        let dest = destination(&dir).await;
        let snapshot = RawSnapshot::new(
            "job-1",
            EntityKind::Penalties,
            Some("MA000004".into()),
            1,
            json!([{ "penalty_fixed_id": 1 }]),
        );

        dest.archive(&snapshot).await.unwrap();
        dest.archive(&snapshot).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM raw_api_responses WHERE job_id = 'job-1'")
                .fetch_one(dest.pool())
                .await
                .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }
}
