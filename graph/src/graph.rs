use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::GraphError;
use crate::Handler;
use crate::State;

/// Names that collide with the graph's own derived attributes.
const RESERVED_NAMES: &[&str] = &["states", "initial_state", "terminal_states", "choices"];

/// Declares a [`StateGraph`]: states first, then edges and handlers, then
/// [`build`](Self::build).
///
/// Nothing is validated until `build()`; that is where every construction
/// invariant is checked and the first violation is reported.
pub struct StateGraphBuilder<R> {
    name: String,
    states: Vec<State>,
    transitions: Vec<(String, String)>,
    timeouts: Vec<(String, String, Duration)>,
    handlers: HashMap<String, Arc<dyn Handler<R>>>,
}

impl<R> StateGraphBuilder<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            transitions: Vec::new(),
            timeouts: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Declare that rows may move from `from` to `to`.
    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions.push((from.into(), to.into()));
        self
    }

    /// Declare that rows stuck in `from` for at least `after` are forced
    /// into `to`. Also a child edge. At most one per state.
    pub fn timeout(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        after: Duration,
    ) -> Self {
        self.timeouts.push((from.into(), to.into(), after));
        self
    }

    /// Register the transition-check handler for `state`.
    pub fn handler<H>(mut self, state: impl Into<String>, handler: H) -> Self
    where
        H: Handler<R> + 'static,
    {
        self.handlers.insert(state.into(), Arc::new(handler));
        self
    }

    /// Validate the declaration and produce the immutable graph.
    pub fn build(self) -> Result<StateGraph<R>, GraphError> {
        let mut states: BTreeMap<String, State> = BTreeMap::new();
        for state in self.states {
            if RESERVED_NAMES.contains(&state.name.as_str()) {
                return Err(GraphError::ReservedName(state.name));
            }
            if states.contains_key(&state.name) {
                return Err(GraphError::DuplicateState(state.name));
            }
            states.insert(state.name.clone(), state);
        }

        for (from, to) in &self.transitions {
            link(&mut states, from, to)?;
        }
        for (from, to, after) in &self.timeouts {
            link(&mut states, from, to)?;
            let state = states
                .get_mut(from)
                .ok_or_else(|| GraphError::UnknownState {
                    from: from.clone(),
                    to: to.clone(),
                })?;
            if state.timeout_state.is_some() {
                return Err(GraphError::TimeoutAlreadySet(from.clone()));
            }
            state.timeout_state = Some(to.clone());
            state.timeout_after = Some(*after);
        }

        for name in self.handlers.keys() {
            if !states.contains_key(name) {
                return Err(GraphError::HandlerForUnknownState(name.clone()));
            }
        }

        let mut initial_state: Option<String> = None;
        let mut terminal_states = BTreeSet::new();
        let mut automatic_states = BTreeSet::new();
        let mut deletion_states = BTreeSet::new();
        let mut timeout_states = BTreeSet::new();
        for state in states.values_mut() {
            if state.is_initial() {
                if let Some(first) = &initial_state {
                    return Err(GraphError::MultipleInitialStates {
                        first: first.clone(),
                        second: state.name.clone(),
                    });
                }
                initial_state = Some(state.name.clone());
            }
            if state.delete_after.is_some() {
                deletion_states.insert(state.name.clone());
            }
            if state.timeout_state.is_some() {
                timeout_states.insert(state.name.clone());
            }
            if state.is_terminal() {
                // Terminal implies externally progressed.
                state.externally_progressed = true;
                terminal_states.insert(state.name.clone());
                if self.handlers.contains_key(&state.name) {
                    return Err(GraphError::TerminalStateWithHandler(state.name.clone()));
                }
            } else if !state.externally_progressed {
                if state.retry_after.is_none() {
                    return Err(GraphError::MissingRetryAfter(state.name.clone()));
                }
                if !self.handlers.contains_key(&state.name) {
                    return Err(GraphError::MissingHandler(state.name.clone()));
                }
                automatic_states.insert(state.name.clone());
            }
        }
        let initial_state = initial_state.ok_or(GraphError::NoInitialState)?;

        Ok(StateGraph {
            name: self.name,
            states,
            handlers: self.handlers,
            initial_state,
            terminal_states,
            automatic_states,
            deletion_states,
            timeout_states,
        })
    }
}

fn link(
    states: &mut BTreeMap<String, State>,
    from: &str,
    to: &str,
) -> Result<(), GraphError> {
    let unknown = |missing: &str| GraphError::UnknownState {
        from: from.to_string(),
        to: missing.to_string(),
    };
    if !states.contains_key(to) {
        return Err(unknown(to));
    }
    states
        .get_mut(from)
        .ok_or_else(|| unknown(from))?
        .children
        .insert(to.to_string());
    states
        .get_mut(to)
        .ok_or_else(|| unknown(to))?
        .parents
        .insert(from.to_string());
    Ok(())
}

/// A validated graph of states and the transitions allowed between them.
///
/// Read-only after construction; share it freely behind an `Arc`.
pub struct StateGraph<R> {
    name: String,
    states: BTreeMap<String, State>,
    handlers: HashMap<String, Arc<dyn Handler<R>>>,
    initial_state: String,
    terminal_states: BTreeSet<String>,
    automatic_states: BTreeSet<String>,
    deletion_states: BTreeSet<String>,
    timeout_states: BTreeSet<String>,
}

impl<R> std::fmt::Debug for StateGraph<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("initial_state", &self.initial_state)
            .field("terminal_states", &self.terminal_states)
            .field("automatic_states", &self.automatic_states)
            .field("deletion_states", &self.deletion_states)
            .field("timeout_states", &self.timeout_states)
            .finish()
    }
}

impl<R> StateGraph<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    pub fn handler(&self, state: &str) -> Option<&Arc<dyn Handler<R>>> {
        self.handlers.get(state)
    }

    /// The single state new rows are created in.
    pub fn initial_state(&self) -> &State {
        &self.states[&self.initial_state]
    }

    pub fn terminal_states(&self) -> &BTreeSet<String> {
        &self.terminal_states
    }

    /// Non-terminal states the engine progresses on its own.
    pub fn automatic_states(&self) -> &BTreeSet<String> {
        &self.automatic_states
    }

    /// States whose rows are swept by the deletion task.
    pub fn deletion_states(&self) -> &BTreeSet<String> {
        &self.deletion_states
    }

    pub fn timeout_states(&self) -> &BTreeSet<String> {
        &self.timeout_states
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::HandlerResult;

    #[derive(Clone)]
    struct Row;

    fn noop(_row: Row) -> futures::future::BoxFuture<'static, HandlerResult> {
        async { Ok(None) }.boxed()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn basic() -> StateGraphBuilder<Row> {
        StateGraphBuilder::new("basic")
            .state(State::new("new").retry_after(secs(5)))
            .state(State::new("done").externally_progressed())
            .transition("new", "done")
            .handler("new", noop)
    }

    #[test]
    fn builds_and_derives_sets() {
        let graph = basic().build().expect("graph should build");
        assert_eq!(graph.initial_state().name(), "new");
        assert_eq!(
            graph.terminal_states().iter().collect::<Vec<_>>(),
            vec!["done"]
        );
        assert_eq!(
            graph.automatic_states().iter().collect::<Vec<_>>(),
            vec!["new"]
        );
        assert!(graph.deletion_states().is_empty());
        let new = graph.state("new").expect("state exists");
        assert!(new.children().contains("done"));
        let done = graph.state("done").expect("state exists");
        assert!(done.parents().contains("new"));
        // Terminal states are implicitly externally progressed.
        assert!(done.is_externally_progressed());
    }

    #[test]
    fn timeout_edge_is_also_a_child_edge() {
        let graph = StateGraphBuilder::<Row>::new("g")
            .state(State::new("new").retry_after(secs(5)))
            .state(State::new("timed_out").externally_progressed())
            .state(State::new("done").externally_progressed())
            .transition("new", "done")
            .timeout("new", "timed_out", secs(10))
            .handler("new", noop)
            .build()
            .expect("graph should build");
        let new = graph.state("new").expect("state exists");
        assert!(new.children().contains("timed_out"));
        assert_eq!(new.timeout_state(), Some("timed_out"));
        assert_eq!(new.timeout_after_duration(), Some(secs(10)));
        assert_eq!(
            graph.timeout_states().iter().collect::<Vec<_>>(),
            vec!["new"]
        );
    }

    #[test]
    fn rejects_second_timeout_edge() {
        let err = StateGraphBuilder::<Row>::new("g")
            .state(State::new("new").retry_after(secs(5)))
            .state(State::new("a").externally_progressed())
            .state(State::new("b").externally_progressed())
            .timeout("new", "a", secs(1))
            .timeout("new", "b", secs(1))
            .handler("new", noop)
            .build()
            .expect_err("second timeout must fail");
        assert_eq!(err, GraphError::TimeoutAlreadySet("new".to_string()));
    }

    #[test]
    fn rejects_multiple_initial_states() {
        let err = StateGraphBuilder::<Row>::new("g")
            .state(State::new("a").retry_after(secs(1)))
            .state(State::new("b").retry_after(secs(1)))
            .state(State::new("end").externally_progressed())
            .transition("a", "end")
            .transition("b", "end")
            .handler("a", noop)
            .handler("b", noop)
            .build()
            .expect_err("two roots must fail");
        assert_eq!(
            err,
            GraphError::MultipleInitialStates {
                first: "a".to_string(),
                second: "b".to_string(),
            }
        );
    }

    #[test]
    fn rejects_graph_without_initial_state() {
        // Two states pointing at each other: both have parents.
        let err = StateGraphBuilder::<Row>::new("g")
            .state(State::new("a").retry_after(secs(1)))
            .state(State::new("b").retry_after(secs(1)))
            .transition("a", "b")
            .transition("b", "a")
            .handler("a", noop)
            .handler("b", noop)
            .build()
            .expect_err("no root must fail");
        assert_eq!(err, GraphError::NoInitialState);
    }

    #[test]
    fn force_initial_overrides_parent_inference() {
        let graph = StateGraphBuilder::<Row>::new("g")
            .state(State::new("a").retry_after(secs(1)).force_initial())
            .state(State::new("b").retry_after(secs(1)))
            .state(State::new("end").externally_progressed())
            .transition("b", "a")
            .transition("b", "end")
            .transition("a", "end")
            .handler("a", noop)
            .handler("b", noop)
            .build();
        // `b` has no parents and `a` is forced: two initial states.
        assert!(matches!(
            graph.err(),
            Some(GraphError::MultipleInitialStates { .. })
        ));
    }

    #[test]
    fn rejects_terminal_state_with_handler() {
        let err = basic()
            .handler("done", noop)
            .build()
            .expect_err("terminal handler must fail");
        assert_eq!(err, GraphError::TerminalStateWithHandler("done".to_string()));
    }

    #[test]
    fn rejects_automatic_state_without_retry_after() {
        let err = StateGraphBuilder::<Row>::new("g")
            .state(State::new("new"))
            .state(State::new("done").externally_progressed())
            .transition("new", "done")
            .handler("new", noop)
            .build()
            .expect_err("missing retry_after must fail");
        assert_eq!(err, GraphError::MissingRetryAfter("new".to_string()));
    }

    #[test]
    fn rejects_automatic_state_without_handler() {
        let err = StateGraphBuilder::<Row>::new("g")
            .state(State::new("new").retry_after(secs(5)))
            .state(State::new("done").externally_progressed())
            .transition("new", "done")
            .build()
            .expect_err("missing handler must fail");
        assert_eq!(err, GraphError::MissingHandler("new".to_string()));
    }

    #[test]
    fn rejects_reserved_state_names() {
        for name in ["states", "initial_state", "terminal_states", "choices"] {
            let err = StateGraphBuilder::<Row>::new("g")
                .state(State::new(name))
                .build()
                .expect_err("reserved name must fail");
            assert_eq!(err, GraphError::ReservedName(name.to_string()));
        }
    }

    #[test]
    fn rejects_unknown_edge_targets() {
        let err = basic()
            .transition("new", "missing")
            .build()
            .expect_err("unknown target must fail");
        assert_eq!(
            err,
            GraphError::UnknownState {
                from: "new".to_string(),
                to: "missing".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_states() {
        let err = basic()
            .state(State::new("new"))
            .build()
            .expect_err("duplicate must fail");
        assert_eq!(err, GraphError::DuplicateState("new".to_string()));
    }

    #[test]
    fn externally_progressed_state_may_lack_handler_and_retry() {
        // `waiting` is non-terminal (it has a child) but manual.
        let graph = StateGraphBuilder::<Row>::new("g")
            .state(State::new("new").retry_after(secs(1)))
            .state(State::new("waiting").externally_progressed())
            .state(State::new("done").externally_progressed())
            .transition("new", "waiting")
            .transition("waiting", "done")
            .handler("new", noop)
            .build()
            .expect("graph should build");
        assert!(!graph.automatic_states().contains("waiting"));
        assert!(!graph.terminal_states().contains("waiting"));
    }
}
