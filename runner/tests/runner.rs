use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use pretty_assertions::assert_eq;
use ratchet_engine::EngineError;
use ratchet_engine::MemoryStore;
use ratchet_engine::ModelQueue;
use ratchet_engine::RowStore;
use ratchet_engine::StateRow;
use ratchet_engine::TransitionEngine;
use ratchet_engine::TransitionJob;
use ratchet_graph::HandlerResult;
use ratchet_graph::State;
use ratchet_graph::StateGraph;
use ratchet_graph::StateGraphBuilder;
use ratchet_runner::ModelRegistry;
use ratchet_runner::RegistryError;
use ratchet_runner::Runner;
use ratchet_runner::RunnerConfig;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct BasicRow {
    id: i64,
    ready: bool,
    state: String,
    state_changed: DateTime<Utc>,
    state_next: Option<DateTime<Utc>>,
}

impl BasicRow {
    fn new(id: i64, ready: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            ready,
            state: "new".to_string(),
            state_changed: now,
            state_next: Some(now),
        }
    }
}

impl StateRow for BasicRow {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn state(&self) -> &str {
        &self.state
    }

    fn state_changed(&self) -> DateTime<Utc> {
        self.state_changed
    }

    fn state_next(&self) -> Option<DateTime<Utc>> {
        self.state_next
    }

    fn set_state(&mut self, state: String) {
        self.state = state;
    }

    fn set_state_changed(&mut self, at: DateTime<Utc>) {
        self.state_changed = at;
    }

    fn set_state_next(&mut self, at: Option<DateTime<Utc>>) {
        self.state_next = at;
    }
}

fn check_new(row: BasicRow) -> BoxFuture<'static, HandlerResult> {
    async move { Ok(row.ready.then(|| "done".to_string())) }.boxed()
}

fn check_slow(_row: BasicRow) -> BoxFuture<'static, HandlerResult> {
    async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Some("done".to_string()))
    }
    .boxed()
}

fn check_pending_delete(row: BasicRow) -> BoxFuture<'static, HandlerResult> {
    async move { Ok(row.ready.then(|| "deleted".to_string())) }.boxed()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn basic_graph() -> StateGraph<BasicRow> {
    StateGraphBuilder::new("basic")
        .state(State::new("new").retry_after(secs(5)))
        .state(State::new("slow").retry_after(secs(5)))
        .state(State::new("done").externally_progressed())
        .state(State::new("timed_out").delete_after(secs(10)))
        .state(State::new("pending_delete").retry_after(secs(5)).start_after(secs(5)))
        .state(State::new("deleted").delete_after(secs(10)))
        .transition("new", "done")
        .transition("new", "slow")
        .transition("new", "pending_delete")
        .timeout("new", "timed_out", secs(10))
        .transition("slow", "done")
        .transition("done", "pending_delete")
        .transition("pending_delete", "deleted")
        .handler("new", check_new)
        .handler("slow", check_slow)
        .handler("pending_delete", check_pending_delete)
        .build()
        .expect("basic graph should build")
}

fn fixture() -> (TransitionEngine<BasicRow>, Arc<MemoryStore<BasicRow>>) {
    let store = Arc::new(MemoryStore::new());
    let engine = TransitionEngine::new(
        "basic",
        Arc::new(basic_graph()),
        Arc::clone(&store) as Arc<dyn RowStore<BasicRow>>,
    );
    (engine, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_progresses_ready_rows_only() {
    let (engine, store) = fixture();
    store.insert(BasicRow::new(1, true)).await;
    store.insert(BasicRow::new(2, false)).await;

    let mut runner = Runner::new(
        RunnerConfig::default(),
        vec![Arc::new(engine) as Arc<dyn ModelQueue>],
    );
    runner.run(Some(Duration::ZERO)).await;

    // The ready row advanced into the externally progressed `done`.
    let ready = store.get(&1).await.expect("row exists");
    assert_eq!(ready.state, "done");
    assert_eq!(ready.state_next, None);
    // The unready row stayed put and was rescheduled, not dropped.
    let unready = store.get(&2).await.expect("row exists");
    assert_eq!(unready.state, "new");
    assert!(unready.state_next.is_some());

    assert_eq!(runner.handled().await.get("basic"), Some(&2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_deletes_stale_rows() {
    let (engine, store) = fixture();
    let mut stale = BasicRow::new(1, false);
    store.insert(stale.clone()).await;
    engine
        .transition(&mut stale, "deleted")
        .await
        .expect("transition");
    stale.state_changed = Utc::now() - TimeDelta::days(365);
    store.insert(stale).await;

    let mut fresh = BasicRow::new(2, false);
    store.insert(fresh.clone()).await;
    engine
        .transition(&mut fresh, "deleted")
        .await
        .expect("transition");

    let mut runner = Runner::new(
        RunnerConfig::default(),
        vec![Arc::new(engine) as Arc<dyn ModelQueue>],
    );
    runner.run(Some(Duration::ZERO)).await;

    assert!(!store.contains(&1).await);
    assert!(store.contains(&2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_recovery_frees_the_worker() {
    let (engine, store) = fixture();
    let mut slow = BasicRow::new(1, false);
    store.insert(slow.clone()).await;
    engine
        .transition(&mut slow, "slow")
        .await
        .expect("transition");
    // Give the slow row an earlier state_next so it is claimed first.
    slow.state_next = DateTime::from_timestamp(0, 0);
    store.insert(slow).await;
    store.insert(BasicRow::new(2, true)).await;

    let config = RunnerConfig {
        concurrency: 1,
        task_deadline: Duration::from_secs(1),
        ..Default::default()
    };
    let mut runner = Runner::new(config, vec![Arc::new(engine) as Arc<dyn ModelQueue>]);
    runner.run(Some(Duration::from_secs(5))).await;

    // The slow handler never got to finish: its row is unchanged and pushed
    // into the future by the claim's visibility timeout.
    let slow = store.get(&1).await.expect("row exists");
    assert_eq!(slow.state, "slow");
    assert!(slow.state_next.expect("state_next") > Utc::now());
    // The fast row got the worker once the deadline freed it.
    let fast = store.get(&2).await.expect("row exists");
    assert_eq!(fast.state, "done");
}

#[tokio::test]
async fn liveness_file_is_written_on_watchdog_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("liveness");
    let config = RunnerConfig {
        liveness_file: Some(path.clone()),
        ..Default::default()
    };
    let mut runner = Runner::new(config, Vec::new());
    runner.run(Some(Duration::ZERO)).await;

    let contents = std::fs::read_to_string(&path).expect("liveness file exists");
    let epoch: u64 = contents.trim().parse().expect("epoch seconds");
    assert!(epoch > 0);
}

struct NullModel {
    label: String,
    claims: Arc<Mutex<Vec<String>>>,
}

impl NullModel {
    fn new(label: &str, claims: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            claims: Arc::clone(claims),
        })
    }
}

#[async_trait]
impl ModelQueue for NullModel {
    fn label(&self) -> &str {
        &self.label
    }

    fn has_deletion_states(&self) -> bool {
        false
    }

    async fn claim_ready(
        &self,
        _limit: usize,
        _lock_period: Duration,
    ) -> Result<Vec<TransitionJob>, EngineError> {
        self.claims.lock().await.push(self.label.clone());
        Ok(Vec::new())
    }

    async fn delete_expired(&self) -> Result<u64, EngineError> {
        Ok(0)
    }

    async fn count_pending(&self) -> Result<u64, EngineError> {
        Ok(0)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn models_rotate_between_scheduling_passes() {
    let claims = Arc::new(Mutex::new(Vec::new()));
    let a = NullModel::new("a", &claims) as Arc<dyn ModelQueue>;
    let b = NullModel::new("b", &claims) as Arc<dyn ModelQueue>;
    let mut runner = Runner::new(RunnerConfig::default(), vec![a, b]);
    runner.run(Some(Duration::ZERO)).await;
    runner.run(Some(Duration::ZERO)).await;

    assert_eq!(*claims.lock().await, vec!["a", "b", "b", "a"]);
}

#[tokio::test]
async fn registry_resolves_labels_and_exclusions() {
    let claims = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ModelRegistry::new();
    registry.register(NullModel::new("posts", &claims));
    registry.register(NullModel::new("users", &claims));
    registry.register(NullModel::new("emails", &claims));

    assert_eq!(registry.labels(), vec!["posts", "users", "emails"]);

    // No labels means everything, minus exclusions.
    let all = registry.resolve(&[], &[]).expect("resolve");
    assert_eq!(all.len(), 3);
    let trimmed = registry
        .resolve(&[], &["users".to_string()])
        .expect("resolve");
    assert_eq!(
        trimmed.iter().map(|m| m.label().to_string()).collect::<Vec<_>>(),
        vec!["posts", "emails"]
    );

    // Explicit labels select just those.
    let chosen = registry
        .resolve(&["emails".to_string()], &[])
        .expect("resolve");
    assert_eq!(chosen.len(), 1);
    assert_eq!(chosen[0].label(), "emails");

    // Unknown labels are an error, not a silent no-op.
    let err = registry
        .resolve(&["missing".to_string()], &[])
        .expect_err("unknown label");
    assert_eq!(err, RegistryError::UnknownLabel("missing".to_string()));
}
