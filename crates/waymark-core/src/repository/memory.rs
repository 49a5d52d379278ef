//! In-memory `ExecutionRepository` for tests and embedded use.
//!
//! States and checkpoints are cloned on every write and every read, so callers
//! never share a mutable value with the store. Cloning the repository clones the
//! handle: all clones see the same tables, which is how tests simulate a
//! process restart against surviving storage.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;
use waymark_types::error::RepositoryError;
use waymark_types::execution::{Checkpoint, ExecutionState};

use super::execution::ExecutionRepository;

#[derive(Default)]
struct Tables {
    states: HashMap<Uuid, ExecutionState>,
    checkpoints: HashMap<Uuid, Vec<Checkpoint>>,
}

/// Reference persistence adapter backed by process memory.
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryExecutionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExecutionRepository").finish_non_exhaustive()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save_state(&self, state: &ExecutionState) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.states.insert(state.execution_id, state.clone());
        Ok(())
    }

    async fn load_state(&self, execution_id: &Uuid) -> Result<Option<ExecutionState>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.states.get(execution_id).cloned())
    }

    async fn list_pending_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<&ExecutionState> = tables
            .states
            .values()
            .filter(|s| s.status.is_resumable())
            .collect();
        pending.sort_by_key(|s| (s.started_at, s.execution_id));
        Ok(pending.into_iter().map(|s| s.execution_id).collect())
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionState>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut all: Vec<ExecutionState> = tables.states.values().cloned().collect();
        all.sort_by_key(|s| (s.started_at, s.execution_id));
        Ok(all)
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.checkpoints.remove(execution_id);
        Ok(tables.states.remove(execution_id).is_some())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables
            .checkpoints
            .entry(checkpoint.execution_id)
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoints(&self, execution_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.checkpoints.get(execution_id).cloned().unwrap_or_default())
    }

    async fn commit_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        state: &ExecutionState,
    ) -> Result<(), RepositoryError> {
        // One write guard covers both tables.
        let mut tables = self.tables.write().await;
        tables
            .checkpoints
            .entry(checkpoint.execution_id)
            .or_default()
            .push(checkpoint.clone());
        tables.states.insert(state.execution_id, state.clone());
        Ok(())
    }
}
