use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::postgres::PgHasArrayType;
use sqlx::postgres::PgRow;

use crate::RowStore;
use crate::StateRow;
use crate::StoreError;

/// Postgres-backed [`RowStore`] for one managed table.
///
/// The table carries the three state columns next to whatever payload
/// columns the row type maps:
///
/// ```sql
/// CREATE TABLE posts (
///     id BIGINT PRIMARY KEY,
///     -- payload columns ...
///     state TEXT NOT NULL,
///     state_changed TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     state_next TIMESTAMPTZ NULL DEFAULT NOW()
/// );
/// CREATE INDEX posts_state_changed ON posts (state_changed);
/// CREATE INDEX posts_state_next ON posts (state_next);
/// ```
///
/// Claiming leans on `FOR NO KEY UPDATE SKIP LOCKED`, so concurrent runners
/// coordinate purely through the database; there is no separate lock
/// service.
pub struct PgRowStore<R> {
    pool: PgPool,
    table: String,
    _row: PhantomData<fn() -> R>,
}

impl<R> PgRowStore<R> {
    /// `table` is interpolated into SQL verbatim and must be a trusted
    /// identifier, never user input.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            _row: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl<R> RowStore<R> for PgRowStore<R>
where
    R: StateRow + for<'r> sqlx::FromRow<'r, PgRow> + Unpin,
    R::Id: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + PgHasArrayType,
{
    async fn claim_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        hold_until: DateTime<Utc>,
    ) -> Result<Vec<R>, StoreError> {
        // Select and bump share one statement, so the visibility-timeout
        // update commits with the locks still held. The prior state_next is
        // carried through to keep the claimed batch in FIFO order.
        let sql = format!(
            "WITH ready AS ( \
                 SELECT id, state_next FROM {table} \
                 WHERE state_next <= $1 \
                 ORDER BY state_next \
                 LIMIT $2 \
                 FOR NO KEY UPDATE SKIP LOCKED \
             ), claimed AS ( \
                 UPDATE {table} AS t \
                 SET state_next = $3 \
                 FROM ready \
                 WHERE t.id = ready.id \
                 RETURNING t.*, ready.state_next AS prior_state_next \
             ) \
             SELECT * FROM claimed ORDER BY prior_state_next",
            table = self.table
        );
        let rows = sqlx::query_as::<_, R>(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(hold_until)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn schedule(
        &self,
        id: &R::Id,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE {table} SET state_next = $2 WHERE id = $1", table = self.table);
        sqlx::query(&sql)
            .bind(id)
            .bind(state_next)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        ids: &[R::Id],
        state: &str,
        state_changed: DateTime<Utc>,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {table} SET state = $2, state_changed = $3, state_next = $4 \
             WHERE id = ANY($1)",
            table = self.table
        );
        sqlx::query(&sql)
            .bind(ids)
            .bind(state)
            .bind(state_changed)
            .bind(state_next)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch(&self, id: &R::Id) -> Result<Option<R>, StoreError> {
        let sql = format!("SELECT * FROM {table} WHERE id = $1", table = self.table);
        let row = sqlx::query_as::<_, R>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete_expired(
        &self,
        state: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        // Batched so a large backlog never escalates into a long transaction.
        let sql = format!(
            "DELETE FROM {table} WHERE id IN ( \
                 SELECT id FROM {table} \
                 WHERE state = $1 AND state_changed <= $2 \
                 LIMIT $3 \
             )",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(state)
            .bind(cutoff)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_pending(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE state_next <= $1",
            table = self.table
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.unsigned_abs())
    }
}
