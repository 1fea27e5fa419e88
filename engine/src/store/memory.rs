use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::RowStore;
use crate::StateRow;
use crate::StoreError;

/// An in-memory [`RowStore`] with the same observable semantics as the
/// Postgres one.
///
/// Single-process only; the mutex plays the role of the database's row
/// locks, so "skip locked" is trivially satisfied (a claim sees rows only
/// once the previous claim's `state_next` bump is visible). Useful for
/// tests of handlers and graphs without a database.
#[derive(Default)]
pub struct MemoryStore<R: StateRow> {
    rows: Mutex<HashMap<R::Id, R>>,
}

impl<R: StateRow> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, row: R) {
        self.rows.lock().await.insert(row.id(), row);
    }

    pub async fn get(&self, id: &R::Id) -> Option<R> {
        self.rows.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &R::Id) -> bool {
        self.rows.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl<R: StateRow> RowStore<R> for MemoryStore<R> {
    async fn claim_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        hold_until: DateTime<Utc>,
    ) -> Result<Vec<R>, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut ready: Vec<R::Id> = rows
            .values()
            .filter(|row| row.state_next().is_some_and(|next| next <= now))
            .map(StateRow::id)
            .collect();
        ready.sort_by_key(|id| rows[id].state_next());
        ready.truncate(limit);
        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(row) = rows.get_mut(&id) {
                row.set_state_next(Some(hold_until));
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn schedule(
        &self,
        id: &R::Id,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if let Some(row) = self.rows.lock().await.get_mut(id) {
            row.set_state_next(state_next);
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        ids: &[R::Id],
        state: &str,
        state_changed: DateTime<Utc>,
        state_next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                row.set_state(state.to_string());
                row.set_state_changed(state_changed);
                row.set_state_next(state_next);
            }
        }
        Ok(())
    }

    async fn fetch(&self, id: &R::Id) -> Result<Option<R>, StoreError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn delete_expired(
        &self,
        state: &str,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let expired: Vec<R::Id> = rows
            .values()
            .filter(|row| row.state() == state && row.state_changed() <= cutoff)
            .map(StateRow::id)
            .take(limit)
            .collect();
        for id in &expired {
            rows.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn count_pending(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|row| row.state_next().is_some_and(|next| next <= now))
            .count() as u64)
    }
}
