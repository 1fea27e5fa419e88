mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::StateRow;

pub use memory::MemoryStore;
pub use postgres::PgRowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row {0} not found")]
    NotFound(String),
}

/// The operations the engine needs from a persisted table of managed rows.
///
/// The one load-bearing requirement is [`claim_ready`](Self::claim_ready):
/// the select and the `state_next` bump must happen in a single unit of work,
/// and the select must skip rows locked by another session. Everything else
/// is plain row CRUD.
#[async_trait]
pub trait RowStore<R: StateRow>: Send + Sync {
    /// Atomically claim up to `limit` rows with `state_next <= now`, oldest
    /// `state_next` first, bumping each claimed row's `state_next` to
    /// `hold_until` in the same unit of work. Rows locked by another session
    /// are skipped, not waited on.
    async fn claim_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        hold_until: DateTime<Utc>,
    ) -> Result<Vec<R>, StoreError>;

    /// Persist only `state_next` for one row.
    async fn schedule(
        &self,
        id: &R::Id,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Bulk update of the state columns for a set of rows.
    async fn apply_transition(
        &self,
        ids: &[R::Id],
        state: &str,
        state_changed: DateTime<Utc>,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Re-read one row.
    async fn fetch(&self, id: &R::Id) -> Result<Option<R>, StoreError>;

    /// Delete up to `limit` rows sitting in `state` since `cutoff` or
    /// earlier. Returns how many were deleted.
    async fn delete_expired(
        &self,
        state: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError>;

    /// How many rows have `state_next <= now`.
    async fn count_pending(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
