//! SQLite sequence queue implementation.

use shipyard_core::repository::sequence_queue::{QueueFilter, QueueItem, SequenceQueueRepository};
use shipyard_types::error::RepositoryError;
use shipyard_types::scope::EventScope;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

/// SQLite-backed implementation of `SequenceQueueRepository`.
pub struct SqliteSequenceQueueRepository {
    pool: DatabasePool,
}

impl SqliteSequenceQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct QueueRow {
    execution_id: String,
    scope: String,
    queued_at: String,
}

impl QueueRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            scope: row.try_get("scope")?,
            queued_at: row.try_get("queued_at")?,
        })
    }

    fn into_item(self) -> Result<QueueItem, RepositoryError> {
        let execution_id = Uuid::parse_str(&self.execution_id)
            .map_err(|e| RepositoryError::Query(format!("invalid execution id: {e}")))?;
        let scope: EventScope = serde_json::from_str(&self.scope)
            .map_err(|e| RepositoryError::Query(format!("invalid queued scope: {e}")))?;
        Ok(QueueItem {
            execution_id,
            scope,
            queued_at: parse_datetime(&self.queued_at)?,
        })
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &QueueFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(id) = filter.execution_id {
        qb.push(" AND execution_id = ");
        qb.push_bind(id.to_string());
    }
    let columns = [
        ("project", &filter.project),
        ("stage", &filter.stage),
        ("keptn_context", &filter.keptn_context),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            qb.push(format!(" AND {column} = "));
            qb.push_bind(value.clone());
        }
    }
}

impl SequenceQueueRepository for SqliteSequenceQueueRepository {
    async fn queue_sequence(&self, item: &QueueItem) -> Result<(), RepositoryError> {
        let scope =
            serde_json::to_string(&item.scope).map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO sequence_queue (execution_id, project, stage, service, keptn_context, scope, queued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.execution_id.to_string())
        .bind(&item.scope.project)
        .bind(&item.scope.stage)
        .bind(&item.scope.service)
        .bind(&item.scope.keptn_context)
        .bind(&scope)
        .bind(format_datetime(&item.queued_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.message().contains("UNIQUE") => {
                RepositoryError::Conflict(format!(
                    "execution {} is already queued",
                    item.execution_id
                ))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn get_queued_sequences(&self) -> Result<Vec<QueueItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT execution_id, scope, queued_at FROM sequence_queue ORDER BY queued_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = QueueRow::from_row(row).map_err(query_error)?;
            items.push(row.into_item()?);
        }
        Ok(items)
    }

    async fn delete_queue_items(&self, filter: &QueueFilter) -> Result<u64, RepositoryError> {
        filter.ensure_narrowed()?;

        let mut qb = QueryBuilder::new("DELETE FROM sequence_queue");
        push_filter(&mut qb, filter);
        let result = qb
            .build()
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}
