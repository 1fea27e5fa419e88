use std::fmt::Display;
use std::hash::Hash;

use chrono::DateTime;
use chrono::Utc;

/// The managed-row contract.
///
/// Every entity tracked by the engine carries three state columns next to
/// whatever application payload it has: the current state name, when the
/// state last actually changed, and when the next transition attempt is due
/// (`None` exactly when the current state is externally progressed).
///
/// New rows are created in the graph's initial state with both timestamps
/// set to now, so they are immediately eligible.
pub trait StateRow: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Display + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    fn state(&self) -> &str;

    fn state_changed(&self) -> DateTime<Utc>;

    fn state_next(&self) -> Option<DateTime<Utc>>;

    fn set_state(&mut self, state: String);

    fn set_state_changed(&mut self, at: DateTime<Utc>);

    fn set_state_next(&mut self, at: Option<DateTime<Utc>>);
}
