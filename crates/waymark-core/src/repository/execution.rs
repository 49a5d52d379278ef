//! Execution repository trait definition (the persistence adapter contract).
//!
//! Implementations must store owned copies: the engine mutates its in-memory
//! `ExecutionState` after every save, so an adapter that kept a reference (or
//! handed one back) would let later mutations leak into "persisted" data.

use uuid::Uuid;
use waymark_types::error::RepositoryError;
use waymark_types::execution::{Checkpoint, ExecutionState};

/// Repository trait for execution state and checkpoints.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// Upsert the full execution state. Must be durable before returning and
    /// must not corrupt a concurrent `load_state`.
    fn save_state(
        &self,
        state: &ExecutionState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load an execution state by ID.
    fn load_state(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionState>, RepositoryError>> + Send;

    /// IDs whose last-saved status is `pending`, `running` or `compensating`.
    fn list_pending_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// All stored executions, oldest first.
    fn list_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionState>, RepositoryError>> + Send;

    /// Delete an execution and its checkpoints. Returns `true` if it existed.
    fn delete_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Append a checkpoint record.
    fn save_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Checkpoints for an execution in creation order.
    fn load_checkpoints(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Append a checkpoint and save the state that already contains it, as one
    /// atomic write: a concurrent reader sees either neither or both.
    fn commit_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        state: &ExecutionState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
