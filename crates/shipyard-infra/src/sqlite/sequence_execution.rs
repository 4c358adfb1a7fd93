//! SQLite sequence execution repository implementation.
//!
//! The full record is stored as JSON next to the columns lookups filter on.
//! The `version` column is authoritative: every write bumps it and updates
//! are conditional on the version the caller read. The partial unique index
//! on active `(project, stage, service)` slots enforces the one-active-run
//! rule inside the database.

use chrono::Utc;
use shipyard_core::repository::sequence_execution::{
    SequenceExecutionFilter, SequenceExecutionRepository,
};
use shipyard_types::error::RepositoryError;
use shipyard_types::sequence::{LatestEvent, LedgerUpdate, SequenceExecution, TaskEvent};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `SequenceExecutionRepository`.
pub struct SqliteSequenceExecutionRepository {
    pool: DatabasePool,
}

impl SqliteSequenceExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type: the JSON record plus its authoritative version.
struct ExecutionRow {
    record: String,
    version: i64,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            record: row.try_get("record")?,
            version: row.try_get("version")?,
        })
    }

    fn into_execution(self) -> Result<SequenceExecution, RepositoryError> {
        let mut execution: SequenceExecution = serde_json::from_str(&self.record)
            .map_err(|e| RepositoryError::Query(format!("invalid execution record: {e}")))?;
        execution.version = self.version;
        Ok(execution)
    }
}

fn encode(execution: &SequenceExecution) -> Result<String, RepositoryError> {
    serde_json::to_string(execution).map_err(|e| RepositoryError::Query(e.to_string()))
}

/// Map a write error, turning unique violations into [`RepositoryError::Conflict`].
fn write_error(e: sqlx::Error, execution: &SequenceExecution) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("UNIQUE") {
            return RepositoryError::Conflict(format!(
                "active sequence for {}/{}/{}",
                execution.scope.project, execution.scope.stage, execution.scope.service
            ));
        }
    }
    query_error(e)
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SequenceExecutionFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(id) = filter.id {
        qb.push(" AND id = ");
        qb.push_bind(id.to_string());
    }
    let columns = [
        ("project", &filter.project),
        ("stage", &filter.stage),
        ("service", &filter.service),
        ("keptn_context", &filter.keptn_context),
        ("sequence_name", &filter.sequence_name),
        ("current_triggered_id", &filter.current_triggered_id),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            qb.push(format!(" AND {column} = "));
            qb.push_bind(value.clone());
        }
    }
    if !filter.states.is_empty() {
        qb.push(" AND state IN (");
        let mut states = qb.separated(", ");
        for state in &filter.states {
            states.push_bind(state.as_str());
        }
        qb.push(")");
    }
}

impl SequenceExecutionRepository for SqliteSequenceExecutionRepository {
    async fn get(
        &self,
        filter: &SequenceExecutionFilter,
    ) -> Result<Vec<SequenceExecution>, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT record, version FROM sequence_executions");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY triggered_at ASC");

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = ExecutionRow::from_row(row).map_err(query_error)?;
            executions.push(row.into_execution()?);
        }
        Ok(executions)
    }

    async fn insert(&self, execution: &SequenceExecution) -> Result<(), RepositoryError> {
        let record = encode(execution)?;
        let scope = &execution.scope;

        sqlx::query(
            "INSERT INTO sequence_executions (id, project, stage, service, keptn_context, sequence_name, state, current_triggered_id, version, triggered_at, updated_at, record)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(&scope.project)
        .bind(&scope.stage)
        .bind(&scope.service)
        .bind(&scope.keptn_context)
        .bind(&execution.sequence.name)
        .bind(execution.state().as_str())
        .bind(execution.current_triggered_id())
        .bind(execution.version)
        .bind(format_datetime(&execution.triggered_at))
        .bind(format_datetime(&execution.updated_at))
        .bind(&record)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_error(e, execution))?;

        Ok(())
    }

    async fn append_task_event(
        &self,
        triggered_id: &str,
        event: &TaskEvent,
        latest_event: &LatestEvent,
    ) -> Result<Option<SequenceExecution>, RepositoryError> {
        // Single writer connection: the read-modify-write below cannot interleave.
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let row = sqlx::query(
            "SELECT record, version FROM sequence_executions
             WHERE current_triggered_id = ? AND state = 'started' LIMIT 1",
        )
        .bind(triggered_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut execution = ExecutionRow::from_row(&row)
            .map_err(query_error)?
            .into_execution()?;

        match execution.apply_task_event(triggered_id, event) {
            LedgerUpdate::NotCurrent => return Ok(None),
            LedgerUpdate::Unchanged => return Ok(Some(execution)),
            LedgerUpdate::Recorded => {}
        }
        let read_version = execution.version;
        execution.latest_event = Some(latest_event.clone());
        execution.updated_at = Utc::now();
        execution.version = read_version + 1;

        sqlx::query(
            "UPDATE sequence_executions SET version = ?, updated_at = ?, record = ?
             WHERE id = ? AND version = ?",
        )
        .bind(execution.version)
        .bind(format_datetime(&execution.updated_at))
        .bind(encode(&execution)?)
        .bind(execution.id.to_string())
        .bind(read_version)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(Some(execution))
    }

    async fn update(&self, execution: &SequenceExecution) -> Result<bool, RepositoryError> {
        let mut stored = execution.clone();
        stored.version = execution.version + 1;
        let scope = &execution.scope;

        let result = sqlx::query(
            "UPDATE sequence_executions
             SET project = ?, stage = ?, service = ?, keptn_context = ?, sequence_name = ?, state = ?,
                 current_triggered_id = ?, version = ?, updated_at = ?, record = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&scope.project)
        .bind(&scope.stage)
        .bind(&scope.service)
        .bind(&scope.keptn_context)
        .bind(&execution.sequence.name)
        .bind(execution.state().as_str())
        .bind(execution.current_triggered_id())
        .bind(stored.version)
        .bind(format_datetime(&execution.updated_at))
        .bind(encode(&stored)?)
        .bind(execution.id.to_string())
        .bind(execution.version)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_error(e, execution))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM sequence_executions WHERE id = ?")
            .bind(execution.id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_error)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM sequence_executions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, project: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sequence_executions WHERE project = ?")
            .bind(project)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}
