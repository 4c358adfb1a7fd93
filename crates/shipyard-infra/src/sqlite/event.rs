//! SQLite event repository implementation.
//!
//! Each event is stored whole as JSON; the filterable fields are copied into
//! columns. The `(project, kind)` pair names the logical collection.

use shipyard_core::repository::event::{EventFilter, EventRepository};
use shipyard_types::error::RepositoryError;
use shipyard_types::event::{EventKind, KeptnEvent};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `EventRepository`.
pub struct SqliteEventRepository {
    pool: DatabasePool,
}

impl SqliteEventRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Append `AND column = ?` for every constraining field of the filter.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter, kind: EventKind) {
    qb.push(" WHERE project = ");
    qb.push_bind(filter.project.clone());
    qb.push(" AND kind = ");
    qb.push_bind(kind.as_str());

    let columns = [
        ("stage", &filter.stage),
        ("service", &filter.service),
        ("keptn_context", &filter.keptn_context),
        ("triggered_id", &filter.triggered_id),
        ("type", &filter.event_type),
        ("id", &filter.id),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            qb.push(format!(" AND {column} = "));
            qb.push_bind(value.clone());
        }
    }
}

impl EventRepository for SqliteEventRepository {
    async fn insert_event(
        &self,
        project: &str,
        event: &KeptnEvent,
        kind: EventKind,
    ) -> Result<(), RepositoryError> {
        let payload =
            serde_json::to_string(event).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let data = event.event_data();

        sqlx::query(
            "INSERT INTO events (project, kind, id, type, source, stage, service, keptn_context, triggered_id, time, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project)
        .bind(kind.as_str())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(&event.source)
        .bind(&data.stage)
        .bind(&data.service)
        .bind(&event.shkeptncontext)
        .bind(&event.triggeredid)
        .bind(format_datetime(&event.time))
        .bind(&payload)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> Result<Vec<KeptnEvent>, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT payload FROM events");
        push_filter(&mut qb, filter, kind);
        qb.push(" ORDER BY seq ASC");

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload").map_err(query_error)?;
                serde_json::from_str(&payload)
                    .map_err(|e| RepositoryError::Query(format!("invalid event payload: {e}")))
            })
            .collect()
    }

    async fn delete_events(
        &self,
        filter: &EventFilter,
        kind: EventKind,
    ) -> Result<u64, RepositoryError> {
        let mut qb = QueryBuilder::new("DELETE FROM events");
        push_filter(&mut qb, filter, kind);

        let result = qb
            .build()
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_event_collections(&self, project: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM events WHERE project = ?")
            .bind(project)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}
