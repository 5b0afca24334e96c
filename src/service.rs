use crate::connectivity::Connectivity;
use crate::db::{self, Pool};
use crate::model::{Collection, Operation, Record, RecordId};
use crate::policy::StalenessPolicy;
use crate::remote::RemoteStore;
use crate::sync::records_from_remote;
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The surface a front end talks to. Owns nothing ambient: pool, remote
/// client, connectivity handle and policy are all injected at construction,
/// so two services never share hidden state.
///
/// Writes are optimistic: the local snapshot changes first and the call
/// returns once that effect is visible. Remote failures are downgraded to
/// queued retries, never surfaced to the caller.
#[derive(Clone)]
pub struct DataService {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    policy: StalenessPolicy,
}

impl DataService {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            pool,
            remote,
            connectivity,
            policy,
        }
    }

    /// Apply a mutation. The only error this returns is caller misuse
    /// (e.g. an update without a target id); connectivity problems are
    /// absorbed into the pending queue.
    #[instrument(skip_all, fields(collection = collection.as_str(), operation = operation.as_str()))]
    pub async fn write(
        &self,
        collection: Collection,
        operation: Operation,
        payload: Option<Map<String, Value>>,
        record_id: Option<&str>,
    ) -> Result<()> {
        match operation {
            Operation::Create if payload.is_none() => {
                return Err(anyhow!("create requires a payload"));
            }
            Operation::Update if payload.is_none() || record_id.is_none() => {
                return Err(anyhow!("update requires a payload and a record id"));
            }
            Operation::Delete if record_id.is_none() => {
                return Err(anyhow!("delete requires a record id"));
            }
            _ => {}
        }

        self.apply_local(collection, operation, payload.as_ref(), record_id)
            .await;

        if self.connectivity.is_online() {
            match self
                .dispatch_remote(collection, operation, payload.as_ref(), record_id)
                .await
            {
                Ok(()) => {
                    // Pull the authoritative state back so temp ids and
                    // server-side defaults do not linger locally.
                    self.refresh_collection(collection).await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(?err, "remote write failed; queueing for sync");
                }
            }
        } else {
            info!("offline; change saved locally and queued for sync");
        }

        db::enqueue_change(
            &self.pool,
            collection,
            operation,
            payload.as_ref(),
            record_id,
        )
        .await;
        Ok(())
    }

    /// Best-available record list for `collection`: the local snapshot
    /// while offline or freshly written, otherwise a remote read that
    /// falls back to the snapshot on failure.
    pub async fn read(&self, collection: Collection) -> Vec<Record> {
        let online = self.connectivity.is_online();
        let last_write = db::last_write_time(&self.pool, collection).await;
        if self.policy.should_use_local(online, last_write, Utc::now()) {
            return db::load_snapshot(&self.pool, collection).await;
        }

        match self.remote.read_all(collection.as_str()).await {
            Ok(pairs) => {
                let records = records_from_remote(pairs);
                db::save_snapshot(&self.pool, collection, &records).await;
                records
            }
            Err(err) => {
                warn!(collection = collection.as_str(), ?err, "remote read failed; serving snapshot");
                db::load_snapshot(&self.pool, collection).await
            }
        }
    }

    /// Number of queued, not-yet-confirmed changes (UI indicator).
    pub async fn pending_count(&self) -> i64 {
        match db::count_changes(&self.pool).await {
            Ok(count) => count,
            Err(err) => {
                warn!(?err, "failed to count pending changes");
                0
            }
        }
    }

    async fn dispatch_remote(
        &self,
        collection: Collection,
        operation: Operation,
        payload: Option<&Map<String, Value>>,
        record_id: Option<&str>,
    ) -> Result<()> {
        let path = collection.as_str();
        match operation {
            Operation::Create => {
                let payload = payload.expect("validated above");
                self.remote.create(path, payload).await?;
                Ok(())
            }
            Operation::Update => {
                let payload = payload.expect("validated above");
                let id = record_id.expect("validated above");
                self.remote.update(path, id, payload).await
            }
            Operation::Delete => {
                let id = record_id.expect("validated above");
                self.remote.delete(path, id).await
            }
        }
    }

    /// Mutate the cached snapshot in place and write it back whole.
    async fn apply_local(
        &self,
        collection: Collection,
        operation: Operation,
        payload: Option<&Map<String, Value>>,
        record_id: Option<&str>,
    ) {
        let mut records = db::load_snapshot(&self.pool, collection).await;
        match operation {
            Operation::Create => {
                let fields = payload.cloned().unwrap_or_default();
                records.push(Record {
                    id: RecordId::new_local(),
                    fields,
                });
            }
            Operation::Update => {
                let id = record_id.unwrap_or_default();
                if let Some(existing) = records.iter_mut().find(|r| r.id.as_str() == id) {
                    if let Some(fields) = payload {
                        for (key, value) in fields {
                            existing.fields.insert(key.clone(), value.clone());
                        }
                    }
                } else {
                    warn!(collection = collection.as_str(), id, "update target not in snapshot");
                }
            }
            Operation::Delete => {
                let id = record_id.unwrap_or_default();
                records.retain(|r| r.id.as_str() != id);
            }
        }
        // Last writer wins: a slow remote read that resolves after this
        // point may still overwrite the newer snapshot (matches the
        // original behavior; no ordering token is kept).
        db::save_snapshot(&self.pool, collection, &records).await;
    }

    async fn refresh_collection(&self, collection: Collection) {
        match self.remote.read_all(collection.as_str()).await {
            Ok(pairs) => {
                let records = records_from_remote(pairs);
                db::save_snapshot(&self.pool, collection, &records).await;
            }
            Err(err) => {
                warn!(collection = collection.as_str(), ?err, "post-write refresh failed");
            }
        }
    }
}
