use thiserror::Error;

/// Errors raised while building a [`crate::StateGraph`].
///
/// Construction fails on the first violated invariant; every variant names
/// the state at fault so a bad declaration is diagnosable from the message
/// alone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("state `{0}` is declared more than once")]
    DuplicateState(String),

    #[error("cannot name a state `{0}` - this name is reserved")]
    ReservedName(String),

    #[error("transition from `{from}` references unknown state `{to}`")]
    UnknownState { from: String, to: String },

    #[error("state `{0}` already has a timeout transition")]
    TimeoutAlreadySet(String),

    #[error("the graph has more than one initial state: `{first}` and `{second}`")]
    MultipleInitialStates { first: String, second: String },

    #[error("the graph has no initial state")]
    NoInitialState,

    #[error("terminal state `{0}` must not have a handler")]
    TerminalStateWithHandler(String),

    #[error("state `{0}` has no retry_after and is not terminal or externally progressed")]
    MissingRetryAfter(String),

    #[error("state `{0}` has no handler and is not terminal or externally progressed")]
    MissingHandler(String),

    #[error("handler registered for unknown state `{0}`")]
    HandlerForUnknownState(String),
}
