use futures::future::BoxFuture;
use thiserror::Error;

/// What a transition handler decided for one row.
///
/// `Ok(Some(name))` requests a declared transition into `name`, `Ok(None)`
/// means "no transition yet". Everything else flows through
/// [`HandlerError`].
pub type HandlerResult = Result<Option<String>, HandlerError>;

/// Signals a handler can raise instead of returning a transition.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Quiet reschedule: equivalent to returning no transition, but usable
    /// from deep inside nested calls.
    #[error("try again later")]
    TryAgainLater,

    /// Any other handler failure. Logged by the engine and treated as "no
    /// transition"; never kills the worker.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A transition-check function bound to one state.
///
/// The handler receives a snapshot of the row and decides whether it should
/// move on. Handlers may perform arbitrary I/O; blocking work belongs in
/// `tokio::task::spawn_blocking`.
pub trait Handler<R>: Send + Sync {
    fn check(&self, row: R) -> BoxFuture<'static, HandlerResult>;
}

impl<R, F> Handler<R> for F
where
    F: Fn(R) -> BoxFuture<'static, HandlerResult> + Send + Sync,
{
    fn check(&self, row: R) -> BoxFuture<'static, HandlerResult> {
        self(row)
    }
}
