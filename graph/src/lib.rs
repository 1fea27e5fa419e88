//! Declarative state graphs for durable state machines.
//!
//! A [`StateGraph`] is a named collection of [`State`]s plus the transitions
//! that are allowed between them. Graphs are immutable after construction:
//! [`StateGraphBuilder::build`] validates the declaration and either returns
//! a graph or fails with a [`GraphError`] naming the offending state.
//!
//! The graph carries scheduling metadata only; actually moving rows between
//! states is the job of the transition engine in `ratchet-engine`.

mod error;
mod graph;
mod handler;
mod state;

pub use error::GraphError;
pub use graph::StateGraph;
pub use graph::StateGraphBuilder;
pub use handler::Handler;
pub use handler::HandlerError;
pub use handler::HandlerResult;
pub use state::State;
