use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::EngineError;
use crate::StateRow;
use crate::TransitionEngine;

/// What one transition check did, for logging and accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub row: String,
    pub previous_state: String,
    pub new_state: Option<String>,
}

/// One claimed row, packaged as a runnable unit of work.
///
/// Created by [`ModelQueue::claim_ready`]; the runner hands it to a worker,
/// which runs it to completion or abandons it at its deadline. An abandoned
/// job never writes the row; the claim's visibility timeout re-exposes it.
pub struct TransitionJob {
    row: String,
    future: BoxFuture<'static, Result<TransitionOutcome, EngineError>>,
}

impl TransitionJob {
    pub fn row(&self) -> &str {
        &self.row
    }

    pub async fn run(self) -> Result<TransitionOutcome, EngineError> {
        self.future.await
    }
}

/// The model-type surface the runner schedules over.
///
/// Object safety is the point: the runner holds a heterogeneous list of
/// models whose row types it never sees.
#[async_trait]
pub trait ModelQueue: Send + Sync {
    fn label(&self) -> &str;


    /// Whether this model's graph has any states with a `delete_after`.
    fn has_deletion_states(&self) -> bool;

    /// Claim up to `limit` ready rows as runnable jobs.
    async fn claim_ready(
        &self,
        limit: usize,
        lock_period: Duration,
    ) -> Result<Vec<TransitionJob>, EngineError>;

    /// One deletion sweep pass. Returns how many rows were deleted.
    async fn delete_expired(&self) -> Result<u64, EngineError>;

    /// How many rows are due a transition check right now.
    async fn count_pending(&self) -> Result<u64, EngineError>;
}

impl std::fmt::Debug for dyn ModelQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQueue").field("label", &self.label()).finish()
    }
}

#[async_trait]
impl<R: StateRow> ModelQueue for TransitionEngine<R> {
    fn label(&self) -> &str {
        TransitionEngine::label(self)
    }

    fn has_deletion_states(&self) -> bool {
        !self.graph().deletion_states().is_empty()
    }

    async fn claim_ready(
        &self,
        limit: usize,
        lock_period: Duration,
    ) -> Result<Vec<TransitionJob>, EngineError> {
        let rows = self.get_ready(limit, lock_period).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let engine = self.clone();
                let id = row.id().to_string();
                let previous_state = row.state().to_string();
                TransitionJob {
                    row: id.clone(),
                    future: async move {
                        let mut row = row;
                        let new_state = engine.transition_check(&mut row).await?;
                        Ok(TransitionOutcome {
                            row: id,
                            previous_state,
                            new_state,
                        })
                    }
                    .boxed(),
                }
            })
            .collect())
    }

    async fn delete_expired(&self) -> Result<u64, EngineError> {
        self.do_deletes().await
    }

    async fn count_pending(&self) -> Result<u64, EngineError> {
        TransitionEngine::count_pending(self).await
    }
}
