//! SQLite outbound event queue implementation.

use chrono::{DateTime, Utc};
use shipyard_core::repository::event_queue::{EventQueueRepository, QueuedEvent};
use shipyard_types::error::RepositoryError;
use shipyard_types::event::KeptnEvent;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

/// SQLite-backed implementation of `EventQueueRepository`.
pub struct SqliteEventQueueRepository {
    pool: DatabasePool,
}

impl SqliteEventQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn into_queued(row: &sqlx::sqlite::SqliteRow) -> Result<QueuedEvent, RepositoryError> {
    let event: String = row.try_get("event").map_err(query_error)?;
    let dispatch_at: String = row.try_get("dispatch_at").map_err(query_error)?;
    let event: KeptnEvent = serde_json::from_str(&event)
        .map_err(|e| RepositoryError::Query(format!("invalid queued event: {e}")))?;
    Ok(QueuedEvent {
        event,
        dispatch_at: parse_datetime(&dispatch_at)?,
    })
}

impl EventQueueRepository for SqliteEventQueueRepository {
    async fn queue_event(&self, queued: &QueuedEvent) -> Result<(), RepositoryError> {
        let event = serde_json::to_string(&queued.event)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO event_queue (id, event_type, keptn_context, dispatch_at, event)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&queued.event.id)
        .bind(&queued.event.event_type)
        .bind(&queued.event.shkeptncontext)
        .bind(format_datetime(&queued.dispatch_at))
        .bind(&event)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.message().contains("UNIQUE") => {
                RepositoryError::Conflict(format!("event {} is already queued", queued.event.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn get_due_events(&self, now: DateTime<Utc>) -> Result<Vec<QueuedEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event, dispatch_at FROM event_queue
             WHERE dispatch_at <= ? ORDER BY dispatch_at ASC, rowid ASC",
        )
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter().map(into_queued).collect()
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM event_queue WHERE id = ?")
            .bind(event_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_events(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event_queue")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count as u64)
    }
}
