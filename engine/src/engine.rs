use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use ratchet_graph::HandlerError;
use ratchet_graph::StateGraph;
use thiserror::Error;
use tracing::error;
use tracing::warn;

use crate::RowStore;
use crate::StateRow;
use crate::StoreError;

/// Upper bound on rows deleted per state per sweep pass.
pub const DELETE_BATCH_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A handler requested a transition that is not a declared edge. This is
    /// a programming error in the handler; it bubbles out of the worker and
    /// the row is left untouched.
    #[error("cannot transition from `{from}` to `{to}` - not a declared transition")]
    IllegalTransition { from: String, to: String },

    #[error("row is in unknown state `{0}`")]
    UnknownState(String),

    #[error("state `{0}` has no handler")]
    MissingHandler(String),

    #[error("state `{0}` has no retry_after")]
    MissingRetryAfter(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Binds a state graph to a store and runs transitions for one model type.
///
/// All coordination between concurrent engines (within this process or
/// across runners) happens through the store's row claiming; the engine
/// itself keeps no mutable state.
pub struct TransitionEngine<R: StateRow> {
    label: String,
    graph: Arc<StateGraph<R>>,
    store: Arc<dyn RowStore<R>>,
}

impl<R: StateRow> Clone for TransitionEngine<R> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            graph: Arc::clone(&self.graph),
            store: Arc::clone(&self.store),
        }
    }
}

impl<R: StateRow> TransitionEngine<R> {
    pub fn new(
        label: impl Into<String>,
        graph: Arc<StateGraph<R>>,
        store: Arc<dyn RowStore<R>>,
    ) -> Self {
        Self {
            label: label.into(),
            graph,
            store,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn graph(&self) -> &Arc<StateGraph<R>> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn RowStore<R>> {
        &self.store
    }

    /// Seconds the row has spent in its current state.
    pub fn state_age(&self, row: &R) -> Duration {
        (Utc::now() - row.state_changed()).to_std().unwrap_or_default()
    }

    /// Claim up to `number` rows that are ready to be looked at.
    ///
    /// Claimed rows get their `state_next` bumped by twice `lock_period`, so
    /// a worker that crashes or wedges mid-task releases its rows naturally
    /// once the visibility timeout lapses.
    pub async fn get_ready(
        &self,
        number: usize,
        lock_period: Duration,
    ) -> Result<Vec<R>, EngineError> {
        let now = Utc::now();
        let hold_until = now + to_delta(lock_period * 2);
        Ok(self.store.claim_ready(now, number, hold_until).await?)
    }

    /// Attempt to progress one row by running its state's handler.
    ///
    /// Returns the name of the state the row moved to, or `None` if no
    /// transition occurred. The caller must hold the row via
    /// [`get_ready`](Self::get_ready) (or be running synchronously in a
    /// test).
    pub async fn transition_check(&self, row: &mut R) -> Result<Option<String>, EngineError> {
        let current = self
            .graph
            .state(row.state())
            .ok_or_else(|| EngineError::UnknownState(row.state().to_string()))?;

        // Externally progressed rows shouldn't have been claimed at all;
        // clear state_next so it doesn't happen again.
        if current.is_externally_progressed() {
            warn!(
                model = %self.label,
                state = current.name(),
                "trying to progress an externally progressed state"
            );
            row.set_state_next(None);
            self.store.schedule(&row.id(), None).await?;
            return Ok(None);
        }

        let handler = self
            .graph
            .handler(current.name())
            .ok_or_else(|| EngineError::MissingHandler(current.name().to_string()))?;
        let next = match handler.check(row.clone()).await {
            Ok(next) => next,
            Err(HandlerError::TryAgainLater) => None,
            Err(HandlerError::Other(err)) => {
                error!(
                    model = %self.label,
                    state = current.name(),
                    "transition handler failed: {err:#}"
                );
                None
            }
        };

        if let Some(next) = next {
            let target = self
                .graph
                .state(&next)
                .ok_or_else(|| EngineError::UnknownState(next.clone()))?;
            if !current.children().contains(target.name()) {
                return Err(EngineError::IllegalTransition {
                    from: current.name().to_string(),
                    to: target.name().to_string(),
                });
            }
            let target = target.name().to_string();
            self.transition(row, &target).await?;
            return Ok(Some(target));
        }

        // Timeouts are checked after the handler, so a returned transition
        // always wins over an imminent timeout.
        if let (Some(timeout_state), Some(timeout_after)) =
            (current.timeout_state(), current.timeout_after_duration())
            && Utc::now() - row.state_changed() >= to_delta(timeout_after)
        {
            let timeout_state = timeout_state.to_string();
            self.transition(row, &timeout_state).await?;
            return Ok(Some(timeout_state));
        }

        // Nothing happened; schedule the next attempt.
        let retry_after = current
            .retry_after_duration()
            .ok_or_else(|| EngineError::MissingRetryAfter(current.name().to_string()))?;
        let next_attempt = Utc::now() + to_delta(retry_after);
        row.set_state_next(Some(next_attempt));
        self.store.schedule(&row.id(), Some(next_attempt)).await?;
        Ok(None)
    }

    /// Forcibly move one row into `target`, then refresh the caller's handle
    /// from the store.
    pub async fn transition(&self, row: &mut R, target: &str) -> Result<(), EngineError> {
        let id = row.id();
        self.transition_many(std::slice::from_ref(&id), target).await?;
        let fresh = self
            .store
            .fetch(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        *row = fresh;
        Ok(())
    }

    /// Forcibly move a set of rows into `target` with one store update.
    pub async fn transition_many(&self, ids: &[R::Id], target: &str) -> Result<(), EngineError> {
        let target = self
            .graph
            .state(target)
            .ok_or_else(|| EngineError::UnknownState(target.to_string()))?;
        let now = Utc::now();
        let state_next = if target.is_externally_progressed() {
            None
        } else {
            Some(now + to_delta(target.start_after_duration()))
        };
        self.store
            .apply_transition(ids, target.name(), now, state_next)
            .await?;
        Ok(())
    }

    /// Delete rows that have lingered in a deletion state past its
    /// `delete_after`, in batches of [`DELETE_BATCH_SIZE`] per state.
    /// Returns how many were deleted.
    pub async fn do_deletes(&self) -> Result<u64, EngineError> {
        let mut deleted = 0;
        for name in self.graph.deletion_states() {
            let Some(state) = self.graph.state(name) else {
                continue;
            };
            let Some(delete_after) = state.delete_after_duration() else {
                continue;
            };
            let cutoff = Utc::now() - to_delta(delete_after);
            deleted += self
                .store
                .delete_expired(name, cutoff, DELETE_BATCH_SIZE)
                .await?;
        }
        Ok(deleted)
    }

    /// How many rows are due a transition check right now.
    pub async fn count_pending(&self) -> Result<u64, EngineError> {
        Ok(self.store.count_pending(Utc::now()).await?)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
