use std::collections::BTreeSet;
use std::time::Duration;

/// One node of a state graph.
///
/// All scheduling metadata is immutable once the owning graph is built.
/// Durations are wall-clock seconds semantics; `Duration` keeps them
/// non-negative by construction.
#[derive(Debug, Clone)]
pub struct State {
    pub(crate) name: String,
    pub(crate) retry_after: Option<Duration>,
    pub(crate) start_after: Duration,
    pub(crate) delete_after: Option<Duration>,
    pub(crate) externally_progressed: bool,
    pub(crate) force_initial: bool,
    pub(crate) timeout_state: Option<String>,
    pub(crate) timeout_after: Option<Duration>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) parents: BTreeSet<String>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry_after: None,
            start_after: Duration::ZERO,
            delete_after: None,
            externally_progressed: false,
            force_initial: false,
            timeout_state: None,
            timeout_after: None,
            children: BTreeSet::new(),
            parents: BTreeSet::new(),
        }
    }

    /// How long to wait before re-attempting the transition check when the
    /// handler reports no transition.
    pub fn retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    /// How long after entering this state the first check should run.
    pub fn start_after(mut self, after: Duration) -> Self {
        self.start_after = after;
        self
    }

    /// Rows sitting in this state at least this long are eligible for the
    /// deletion sweep.
    pub fn delete_after(mut self, after: Duration) -> Self {
        self.delete_after = Some(after);
        self
    }

    /// Mark this state as having no handler; only a forced transition moves
    /// a row out of it.
    pub fn externally_progressed(mut self) -> Self {
        self.externally_progressed = true;
        self
    }

    /// Make this state initial even though it has parents.
    pub fn force_initial(mut self) -> Self {
        self.force_initial = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_after_duration(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn start_after_duration(&self) -> Duration {
        self.start_after
    }

    pub fn delete_after_duration(&self) -> Option<Duration> {
        self.delete_after
    }

    pub fn is_externally_progressed(&self) -> bool {
        self.externally_progressed
    }

    pub fn timeout_state(&self) -> Option<&str> {
        self.timeout_state.as_deref()
    }

    pub fn timeout_after_duration(&self) -> Option<Duration> {
        self.timeout_after
    }

    /// States reachable from this one via declared transitions, including
    /// the timeout target.
    pub fn children(&self) -> &BTreeSet<String> {
        &self.children
    }

    pub fn parents(&self) -> &BTreeSet<String> {
        &self.parents
    }

    /// A state is initial when forced, or when nothing transitions into it.
    pub fn is_initial(&self) -> bool {
        self.force_initial || self.parents.is_empty()
    }

    /// A state is terminal when nothing transitions out of it. Terminal
    /// states are implicitly externally progressed.
    pub fn is_terminal(&self) -> bool {
        self.children.is_empty()
    }
}
