use anyhow::{anyhow, Result};
use async_trait::async_trait;
use knox_pos::connectivity::Connectivity;
use knox_pos::db;
use knox_pos::model::{Collection, Operation, SyncOutcome, SyncReport};
use knox_pos::remote::RemoteStore;
use knox_pos::sync::SyncEngine;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum RemoteCall {
    Create(String),
    Update(String, String),
    Delete(String, String),
    ReadAll(String),
}

/// Scripted remote store: mutations pop pre-seeded responses (default
/// success), reads serve the `data` map, every call is recorded.
#[derive(Clone, Default)]
struct RecordingRemote {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    data: Arc<Mutex<HashMap<String, Vec<(String, Value)>>>>,
    calls: Arc<Mutex<Vec<RemoteCall>>>,
}

impl RecordingRemote {
    fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn set_data(&self, collection: &str, records: Vec<(&str, Value)>) {
        self.data.lock().await.insert(
            collection.to_string(),
            records
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
    }

    async fn pop_response(&self) -> Result<String> {
        let mut guard = self.responses.lock().await;
        guard.pop_front().unwrap_or_else(|| Ok("-NremoteKey".into()))
    }

    async fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().await.clone()
    }

    async fn mutation_calls(&self) -> Vec<RemoteCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c, RemoteCall::ReadAll(_)))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for RecordingRemote {
    async fn create(&self, collection: &str, _payload: &Map<String, Value>) -> Result<String> {
        self.calls
            .lock()
            .await
            .push(RemoteCall::Create(collection.to_string()));
        self.pop_response().await
    }

    async fn update(&self, collection: &str, id: &str, _payload: &Map<String, Value>) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(RemoteCall::Update(collection.to_string(), id.to_string()));
        self.pop_response().await.map(|_| ())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(RemoteCall::Delete(collection.to_string(), id.to_string()));
        self.pop_response().await.map(|_| ())
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        self.calls
            .lock()
            .await
            .push(RemoteCall::ReadAll(collection.to_string()));
        Ok(self
            .data
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

fn engine(pool: &sqlx::SqlitePool, remote: &RecordingRemote, online: bool) -> (SyncEngine, Connectivity) {
    let connectivity = Connectivity::new(online);
    let engine = SyncEngine::new(
        pool.clone(),
        Arc::new(remote.clone()) as Arc<dyn RemoteStore>,
        connectivity.clone(),
        3,
    );
    (engine, connectivity)
}

fn completed(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::AlreadyRunning => panic!("sync was unexpectedly rejected"),
    }
}

#[tokio::test]
async fn reconnect_drains_queue_and_adopts_remote_ids() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::with_responses(vec![Ok("-Nserver1".into())]);
    remote
        .set_data("supply", vec![("-Nserver1", json!({"name": "Flour", "price": 10}))])
        .await;

    // One create queued while offline, with an optimistic temp record.
    let flour = payload(&[("name", json!("Flour")), ("price", json!(10))]);
    db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;
    let mut optimistic = db::load_snapshot(&pool, Collection::Supply).await;
    optimistic.push(knox_pos::model::Record {
        id: knox_pos::model::RecordId::new_local(),
        fields: flour.clone(),
    });
    db::save_snapshot(&pool, Collection::Supply, &optimistic).await;
    assert_eq!(db::count_changes(&pool).await.unwrap(), 1);

    let (engine, _conn) = engine(&pool, &remote, true);
    let report = completed(engine.sync_pending().await.unwrap());
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(db::count_changes(&pool).await.unwrap(), 0);
    assert!(db::last_sync(&pool).await.unwrap().is_some());

    // The optimistic temp id is gone; the store-assigned key replaced it.
    let records = db::load_snapshot(&pool, Collection::Supply).await;
    assert_eq!(records.len(), 1);
    assert!(!records[0].id.is_local());
    assert_eq!(records[0].id.as_str(), "-Nserver1");

    // All three collections were refreshed after the successful pass.
    let refreshes: Vec<_> = remote
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, RemoteCall::ReadAll(_)))
        .collect();
    assert_eq!(refreshes.len(), 3);
}

#[tokio::test]
async fn replay_keeps_insertion_order_across_outcomes() {
    let pool = setup_pool().await;
    // First change fails, second succeeds; order must still be A then B.
    let remote = RecordingRemote::with_responses(vec![
        Err(anyhow!("network down")),
        Ok("ok".into()),
    ]);

    let flour = payload(&[("name", json!("Flour"))]);
    let a = db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;
    db::enqueue_change(&pool, Collection::Stock, Operation::Delete, None, Some("s-9")).await;

    let (engine, _conn) = engine(&pool, &remote, true);
    let report = completed(engine.sync_pending().await.unwrap());
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(
        remote.mutation_calls().await,
        vec![
            RemoteCall::Create("supply".into()),
            RemoteCall::Delete("stock".into(), "s-9".into()),
        ]
    );

    // The failure stays queued with one attempt recorded.
    let remaining = db::list_changes(&pool).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].change_id, a);
    assert_eq!(remaining[0].retry_count, 1);
}

#[tokio::test]
async fn a_change_is_dropped_after_three_failed_passes() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::with_responses(vec![
        Err(anyhow!("down")),
        Err(anyhow!("down")),
        Err(anyhow!("down")),
        Err(anyhow!("down")),
    ]);

    let update = payload(&[("price", json!(12))]);
    db::enqueue_change(&pool, Collection::Recipes, Operation::Update, Some(&update), Some("r-1")).await;

    let (engine, _conn) = engine(&pool, &remote, true);

    let first = completed(engine.sync_pending().await.unwrap());
    assert_eq!((first.failed, first.dropped), (1, 0));
    let second = completed(engine.sync_pending().await.unwrap());
    assert_eq!((second.failed, second.dropped), (1, 0));
    let third = completed(engine.sync_pending().await.unwrap());
    assert_eq!((third.failed, third.dropped), (0, 1));

    // Exactly three attempts, then gone for good.
    assert_eq!(remote.mutation_calls().await.len(), 3);
    assert_eq!(db::count_changes(&pool).await.unwrap(), 0);

    let fourth = completed(engine.sync_pending().await.unwrap());
    assert_eq!(fourth, SyncReport::default());
    assert_eq!(remote.mutation_calls().await.len(), 3);
}

#[tokio::test]
async fn offline_collections_replay_to_their_own_paths() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();

    let flour = payload(&[("name", json!("Flour"))]);
    let stock = payload(&[("supplyItemName", json!("Flour")), ("amountInStock", json!(4))]);
    db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;
    db::enqueue_change(&pool, Collection::Stock, Operation::Create, Some(&stock), None).await;
    assert_eq!(db::count_changes(&pool).await.unwrap(), 2);

    let (engine, _conn) = engine(&pool, &remote, true);
    let report = completed(engine.sync_pending().await.unwrap());
    assert_eq!(report.synced, 2);

    assert_eq!(
        remote.mutation_calls().await,
        vec![
            RemoteCall::Create("supply".into()),
            RemoteCall::Create("stock".into()),
        ]
    );
    assert_eq!(db::count_changes(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn offline_engine_leaves_the_queue_alone() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let flour = payload(&[("name", json!("Flour"))]);
    db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;

    let (engine, _conn) = engine(&pool, &remote, false);
    let report = completed(engine.sync_pending().await.unwrap());
    assert_eq!(report, SyncReport::default());
    assert!(remote.calls().await.is_empty());
    assert_eq!(db::count_changes(&pool).await.unwrap(), 1);
}

/// Remote whose first mutation parks until released, to hold a sync pass
/// open while a second trigger arrives.
#[derive(Clone)]
struct GatedRemote {
    inner: RecordingRemote,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RemoteStore for GatedRemote {
    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create(collection, payload).await
    }

    async fn update(&self, collection: &str, id: &str, payload: &Map<String, Value>) -> Result<()> {
        self.inner.update(collection, id, payload).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete(collection, id).await
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        self.inner.read_all(collection).await
    }
}

#[tokio::test]
async fn a_trigger_during_a_running_pass_is_ignored() {
    let pool = setup_pool().await;
    let recording = RecordingRemote::default();
    let gated = GatedRemote {
        inner: recording.clone(),
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    };

    let flour = payload(&[("name", json!("Flour"))]);
    db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;

    let connectivity = Connectivity::new(true);
    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        Arc::new(gated.clone()) as Arc<dyn RemoteStore>,
        connectivity,
        3,
    ));

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_pending().await })
    };
    gated.entered.notified().await;

    // Second trigger while the first pass is parked inside the remote call.
    let overlapped = engine.sync_pending().await.unwrap();
    assert_eq!(overlapped, SyncOutcome::AlreadyRunning);

    gated.release.notify_one();
    let report = completed(running.await.unwrap().unwrap());
    assert_eq!(report.synced, 1);

    // The change was replayed exactly once.
    assert_eq!(recording.mutation_calls().await.len(), 1);
    assert_eq!(db::count_changes(&pool).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_worker_debounces_then_syncs() {
    let pool = setup_pool().await;
    let remote = RecordingRemote::default();
    let flour = payload(&[("name", json!("Flour"))]);
    db::enqueue_change(&pool, Collection::Supply, Operation::Create, Some(&flour), None).await;

    let connectivity = Connectivity::new(false);
    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        Arc::new(remote.clone()) as Arc<dyn RemoteStore>,
        connectivity.clone(),
        3,
    ));

    let worker = engine.clone();
    let handle = tokio::spawn(async move {
        worker
            .run_reconnect_worker(std::time::Duration::from_secs(1))
            .await
    });

    tokio::task::yield_now().await;
    assert_eq!(db::count_changes(&pool).await.unwrap(), 1);

    connectivity.set_online(true);
    // Paused clock: sleeps advance once tasks go idle.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    assert_eq!(db::count_changes(&pool).await.unwrap(), 0);
    handle.abort();
}
