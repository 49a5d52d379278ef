//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `waymark-core` using sqlx with split
//! read/write pools. The full `ExecutionState` is stored as a JSON blob next to
//! a few indexed columns; checkpoints live in an append-only table.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;
use waymark_core::repository::ExecutionRepository;
use waymark_types::error::RepositoryError;
use waymark_types::execution::{Checkpoint, CheckpointKind, ExecutionState, ExecutionStatus};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    state: String,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            state: row.try_get("state")?,
        })
    }

    fn into_state(self) -> Result<ExecutionState, RepositoryError> {
        serde_json::from_str(&self.state)
            .map_err(|e| RepositoryError::Serialization(format!("invalid execution state JSON: {e}")))
    }
}

struct CheckpointRow {
    id: String,
    execution_id: String,
    step_id: String,
    step_index: i64,
    kind: String,
    created_at: String,
    checkpoint: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            step_index: row.try_get("step_index")?,
            kind: row.try_get("kind")?,
            created_at: row.try_get("created_at")?,
            checkpoint: row.try_get("checkpoint")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let kind: CheckpointKind =
            serde_json::from_value(serde_json::Value::String(self.kind.clone()))
                .map_err(|_| RepositoryError::Query(format!("invalid checkpoint kind: {}", self.kind)))?;
        let step_index = usize::try_from(self.step_index)
            .map_err(|_| RepositoryError::Query(format!("invalid step index: {}", self.step_index)))?;
        let state = serde_json::from_str(&self.checkpoint)
            .map_err(|e| RepositoryError::Serialization(format!("invalid checkpoint JSON: {e}")))?;

        Ok(Checkpoint {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: self.step_id,
            step_index,
            kind,
            created_at: parse_datetime(&self.created_at)?,
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn kind_str(kind: CheckpointKind) -> &'static str {
    match kind {
        CheckpointKind::StepCompleted => "step_completed",
        CheckpointKind::Intermediate => "intermediate",
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

const UPSERT_STATE: &str = r#"INSERT INTO executions (id, workflow_id, status, started_at, completed_at, updated_at, state)
   VALUES (?, ?, ?, ?, ?, ?, ?)
   ON CONFLICT(id) DO UPDATE SET
     workflow_id = excluded.workflow_id,
     status = excluded.status,
     completed_at = excluded.completed_at,
     updated_at = excluded.updated_at,
     state = excluded.state"#;

const INSERT_CHECKPOINT: &str = r#"INSERT INTO checkpoints
   (id, execution_id, step_id, step_index, kind, created_at, checkpoint)
   VALUES (?, ?, ?, ?, ?, ?, ?)"#;

async fn upsert_state<'e, E>(executor: E, state: &ExecutionState) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let state_json = serde_json::to_string(state)?;
    sqlx::query(UPSERT_STATE)
        .bind(state.execution_id.to_string())
        .bind(&state.workflow_id)
        .bind(state.status.as_str())
        .bind(format_datetime(&state.started_at))
        .bind(state.completed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&Utc::now()))
        .bind(&state_json)
        .execute(executor)
        .await
        .map_err(query_err)?;
    Ok(())
}

async fn insert_checkpoint<'e, E>(executor: E, checkpoint: &Checkpoint) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let snapshot = serde_json::to_string(&checkpoint.state)?;
    let step_index = i64::try_from(checkpoint.step_index)
        .map_err(|_| RepositoryError::Query(format!("step index too large: {}", checkpoint.step_index)))?;
    sqlx::query(INSERT_CHECKPOINT)
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.execution_id.to_string())
        .bind(&checkpoint.step_id)
        .bind(step_index)
        .bind(kind_str(checkpoint.kind))
        .bind(format_datetime(&checkpoint.created_at))
        .bind(&snapshot)
        .execute(executor)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return RepositoryError::Conflict(format!(
                        "checkpoint {} already exists",
                        checkpoint.id
                    ));
                }
            }
            query_err(e)
        })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn save_state(&self, state: &ExecutionState) -> Result<(), RepositoryError> {
        upsert_state(&self.pool.writer, state).await
    }

    async fn load_state(&self, execution_id: &Uuid) -> Result<Option<ExecutionState>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_state()?))
            }
            None => Ok(None),
        }
    }

    async fn list_pending_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let [a, b, c] = ExecutionStatus::RESUMABLE;
        let rows = sqlx::query(
            "SELECT id FROM executions WHERE status IN (?, ?, ?) ORDER BY started_at ASC, id ASC",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(c.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_err)?;
                parse_uuid(&id)
            })
            .collect()
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionState>, RepositoryError> {
        let rows = sqlx::query("SELECT state FROM executions ORDER BY started_at ASC, id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row).map_err(query_err)?;
            states.push(r.into_state()?);
        }
        Ok(states)
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let id = execution_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query("DELETE FROM checkpoints WHERE execution_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        let result = sqlx::query("DELETE FROM executions WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        insert_checkpoint(&self.pool.writer, checkpoint).await
    }

    async fn load_checkpoints(&self, execution_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE execution_id = ? ORDER BY seq ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = CheckpointRow::from_row(row).map_err(query_err)?;
            checkpoints.push(r.into_checkpoint()?);
        }
        Ok(checkpoints)
    }

    async fn commit_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        state: &ExecutionState,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        insert_checkpoint(&mut *tx, checkpoint).await?;
        upsert_state(&mut *tx, state).await?;
        tx.commit().await.map_err(query_err)?;

        tracing::trace!(
            execution_id = %state.execution_id,
            step_index = checkpoint.step_index,
            "checkpoint committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use serde_json::{Value, json};
    use waymark_core::engine::{Engine, SagaContext, SagaStep, StepError};
    use waymark_types::definition::{
        CompensationStrategy, ExecutionPlan, SagaDefinition, SagaStepDefinition,
    };
    use waymark_types::execution::{CompensationAction, StepStatus};
    use waymark_types::retry::RetryPolicy;

    async fn test_repo() -> (tempfile::TempDir, String, SqliteExecutionRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, url, SqliteExecutionRepository::new(pool))
    }

    fn sample_saga() -> SagaDefinition {
        SagaDefinition {
            id: "book-trip".to_string(),
            name: Some("Book trip".to_string()),
            steps: ["flight", "hotel", "car"]
                .iter()
                .map(|id| SagaStepDefinition {
                    id: id.to_string(),
                    name: None,
                    node_type: "booking".to_string(),
                    params: json!({ "item": id }),
                    timeout_ms: None,
                    retry: None,
                })
                .collect(),
            compensation_strategy: CompensationStrategy::Backward,
            timeout_ms: Some(5_000),
            retry: Some(RetryPolicy::none()),
        }
    }

    fn sample_state() -> ExecutionState {
        let mut metadata = HashMap::new();
        metadata.insert("tenant".to_string(), json!("acme"));
        ExecutionState::new(
            "book-trip",
            ExecutionPlan::Saga {
                definition: sample_saga(),
            },
            json!({ "city": "Lisbon" }),
            metadata,
        )
    }

    fn checkpoint_for(state: &ExecutionState, index: usize, kind: CheckpointKind) -> Checkpoint {
        Checkpoint {
            id: Uuid::now_v7(),
            execution_id: state.execution_id,
            step_id: state.steps[index].id.clone(),
            step_index: index,
            kind,
            created_at: Utc::now(),
            state: json!({ "output": { "index": index } }),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_state_roundtrip() {
        let (_dir, _url, repo) = test_repo().await;
        let mut state = sample_state();
        state.status = ExecutionStatus::Running;
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(json!({ "pnr": "X1" }));
        state.steps[0].compensation = Some(CompensationAction::new("booking", json!({ "item": "flight" })));
        let checkpoint = checkpoint_for(&state, 0, CheckpointKind::StepCompleted);
        state.checkpoints.push(checkpoint);

        repo.save_state(&state).await.unwrap();
        let loaded = repo.load_state(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_state_overwrites() {
        let (_dir, _url, repo) = test_repo().await;
        let mut state = sample_state();
        repo.save_state(&state).await.unwrap();

        state.status = ExecutionStatus::Completed;
        state.completed_at = Some(Utc::now());
        state.output = Some(json!("done"));
        repo.save_state(&state).await.unwrap();

        let loaded = repo.load_state(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.output, Some(json!("done")));
        assert_eq!(repo.list_executions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_state() {
        let (_dir, _url, repo) = test_repo().await;
        assert!(repo.load_state(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pending_filters_by_status() {
        let (_dir, _url, repo) = test_repo().await;
        let mut ids = HashMap::new();
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Compensating,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Compensated,
            ExecutionStatus::Cancelled,
        ] {
            let mut state = sample_state();
            state.status = status;
            repo.save_state(&state).await.unwrap();
            ids.insert(status, state.execution_id);
        }

        let pending = repo.list_pending_executions().await.unwrap();
        assert_eq!(
            pending,
            vec![
                ids[&ExecutionStatus::Pending],
                ids[&ExecutionStatus::Running],
                ids[&ExecutionStatus::Compensating],
            ]
        );
    }

    #[tokio::test]
    async fn test_list_executions_oldest_first() {
        let (_dir, _url, repo) = test_repo().await;
        let mut newer = sample_state();
        let mut older = sample_state();
        older.started_at = newer.started_at - chrono::Duration::seconds(10);
        newer.workflow_id = "newer".to_string();
        older.workflow_id = "older".to_string();

        repo.save_state(&newer).await.unwrap();
        repo.save_state(&older).await.unwrap();

        let listed: Vec<String> = repo
            .list_executions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.workflow_id)
            .collect();
        assert_eq!(listed, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn test_checkpoints_load_in_creation_order() {
        let (_dir, _url, repo) = test_repo().await;
        let state = sample_state();
        repo.save_state(&state).await.unwrap();

        let first = checkpoint_for(&state, 0, CheckpointKind::StepCompleted);
        let partial = checkpoint_for(&state, 1, CheckpointKind::Intermediate);
        let second = checkpoint_for(&state, 1, CheckpointKind::StepCompleted);
        for cp in [&first, &partial, &second] {
            repo.save_checkpoint(cp).await.unwrap();
        }

        let loaded = repo.load_checkpoints(&state.execution_id).await.unwrap();
        assert_eq!(loaded, vec![first.clone(), partial, second]);
        assert!(repo.load_checkpoints(&Uuid::now_v7()).await.unwrap().is_empty());

        let err = repo.save_checkpoint(&first).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_commit_checkpoint_writes_both() {
        let (_dir, _url, repo) = test_repo().await;
        let mut state = sample_state();
        repo.save_state(&state).await.unwrap();

        let cp = checkpoint_for(&state, 0, CheckpointKind::StepCompleted);
        state.steps[0].status = StepStatus::Completed;
        state.checkpoints.push(cp.clone());
        repo.commit_checkpoint(&cp, &state).await.unwrap();

        let loaded = repo.load_state(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.checkpoints, vec![cp.clone()]);
        assert_eq!(loaded.resume_point(), 1);
        assert_eq!(repo.load_checkpoints(&state.execution_id).await.unwrap(), vec![cp]);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let (_dir, _url, repo) = test_repo().await;
        let mut state = sample_state();
        let cp = checkpoint_for(&state, 0, CheckpointKind::StepCompleted);
        repo.save_checkpoint(&cp).await.unwrap();
        repo.save_state(&state).await.unwrap();

        // Reusing the checkpoint ID fails the insert; the state update must roll back.
        state.status = ExecutionStatus::Completed;
        state.checkpoints.push(cp.clone());
        let err = repo.commit_checkpoint(&cp, &state).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let loaded = repo.load_state(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert!(loaded.checkpoints.is_empty());
    }

    #[tokio::test]
    async fn test_delete_execution_removes_checkpoints() {
        let (_dir, _url, repo) = test_repo().await;
        let state = sample_state();
        repo.save_state(&state).await.unwrap();
        repo.save_checkpoint(&checkpoint_for(&state, 0, CheckpointKind::StepCompleted))
            .await
            .unwrap();

        assert!(repo.delete_execution(&state.execution_id).await.unwrap());
        assert!(repo.load_state(&state.execution_id).await.unwrap().is_none());
        assert!(repo.load_checkpoints(&state.execution_id).await.unwrap().is_empty());
        assert!(!repo.delete_execution(&state.execution_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_serialization_error() {
        let (_dir, _url, repo) = test_repo().await;
        let state = sample_state();
        repo.save_state(&state).await.unwrap();
        sqlx::query("UPDATE executions SET state = '{not json' WHERE id = ?")
            .bind(state.execution_id.to_string())
            .execute(&repo.pool.writer)
            .await
            .unwrap();

        let err = repo.load_state(&state.execution_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(_)));
    }

    // -- engine over sqlite -------------------------------------------------

    struct Booking {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SagaStep for Booking {
        async fn execute(
            &self,
            ctx: &SagaContext,
            step: &SagaStepDefinition,
            _input: Value,
        ) -> Result<Value, StepError> {
            self.log.lock().unwrap().push(format!("execute:{}", step.id));
            Ok(json!({ "booked": step.id, "after": ctx.results().len() }))
        }

        async fn compensate(
            &self,
            _ctx: &SagaContext,
            step: &SagaStepDefinition,
            _output: Option<Value>,
        ) -> Result<(), StepError> {
            self.log.lock().unwrap().push(format!("compensate:{}", step.id));
            Ok(())
        }

        fn has_compensation(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_engine_resumes_after_restart() {
        let (_dir, url, repo) = test_repo().await;

        // First process: step 0 completed and checkpointed, then the process died.
        let mut state = sample_state();
        state.status = ExecutionStatus::Running;
        state.current_step = 1;
        state.steps[0].status = StepStatus::Completed;
        state.steps[0].output = Some(json!({ "booked": "flight", "after": 0 }));
        state.steps[1].status = StepStatus::Running;
        let cp = checkpoint_for(&state, 0, CheckpointKind::StepCompleted);
        state.checkpoints.push(cp.clone());
        repo.commit_checkpoint(&cp, &state).await.unwrap();
        drop(repo);

        // Second process reopens the same database.
        let repo = SqliteExecutionRepository::new(DatabasePool::new(&url).await.unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::builder(repo)
            .handler("booking", Booking { log: Arc::clone(&log) })
            .build();
        let mut rx = engine.subscribe();

        let report = engine.recover().await.unwrap();
        assert_eq!(report.resumed, vec![state.execution_id]);

        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                if let Ok(event) = rx.recv().await {
                    if event.name() == "saga:completed" {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        // The driver persists before publishing; wait for it to release the execution.
        while engine.is_running(&state.execution_id) {
            tokio::task::yield_now().await;
        }

        assert_eq!(*log.lock().unwrap(), vec!["execute:hotel", "execute:car"]);
        let done = engine
            .get_execution_state(&state.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.steps[2].output, Some(json!({ "booked": "car", "after": 2 })));
        let stored = engine
            .repository()
            .load_checkpoints(&state.execution_id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
    }
}
