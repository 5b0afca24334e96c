use crate::connectivity::Connectivity;
use crate::db::{self, Pool};
use crate::model::{Collection, Operation, PendingChange, Record, SyncOutcome, SyncReport};
use crate::remote::RemoteStore;
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Replays the pending-change queue against the remote store. At most one
/// pass runs at a time; a trigger while a pass is in flight is ignored.
pub struct SyncEngine {
    pool: Pool,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    max_attempts: i32,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        pool: Pool,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        max_attempts: i32,
    ) -> Self {
        Self {
            pool,
            remote,
            connectivity,
            max_attempts,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one sync pass. Returns [`SyncOutcome::AlreadyRunning`] without
    /// touching the queue if a pass is already draining it.
    #[instrument(skip_all)]
    pub async fn sync_pending(&self) -> Result<SyncOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let result = self.run_pass().await;
        self.in_flight.store(false, Ordering::Release);
        result.map(SyncOutcome::Completed)
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if !self.connectivity.is_online() {
            return Ok(report);
        }

        let changes = db::list_changes(&self.pool).await?;
        if changes.is_empty() {
            return Ok(report);
        }
        info!(count = changes.len(), "syncing pending changes");

        for change in changes {
            match self.apply_remote(&change).await {
                Ok(()) => {
                    db::remove_change(&self.pool, &change.change_id).await?;
                    report.synced += 1;
                }
                Err(err) => {
                    let attempts = db::bump_retry(&self.pool, &change.change_id).await?;
                    if attempts >= self.max_attempts {
                        warn!(
                            change_id = %change.change_id,
                            attempts,
                            ?err,
                            "dropping change after repeated failures"
                        );
                        db::remove_change(&self.pool, &change.change_id).await?;
                        report.dropped += 1;
                    } else {
                        warn!(change_id = %change.change_id, attempts, ?err, "change failed; will retry");
                        report.failed += 1;
                    }
                }
            }
        }

        db::set_last_sync(&self.pool, Utc::now()).await?;

        if report.synced > 0 {
            // Optimistic snapshots may hold temp-id records; replace them
            // with what the store actually assigned.
            self.refresh_snapshots().await;
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            dropped = report.dropped,
            "sync pass finished"
        );
        Ok(report)
    }

    async fn apply_remote(&self, change: &PendingChange) -> Result<()> {
        let collection = change.collection.as_str();
        match change.operation {
            Operation::Create => {
                let payload = change
                    .payload
                    .as_ref()
                    .ok_or_else(|| anyhow!("create change without payload"))?;
                self.remote.create(collection, payload).await?;
                Ok(())
            }
            Operation::Update => {
                let id = change
                    .target_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("update change without target id"))?;
                let payload = change
                    .payload
                    .as_ref()
                    .ok_or_else(|| anyhow!("update change without payload"))?;
                self.remote.update(collection, id, payload).await
            }
            Operation::Delete => {
                let id = change
                    .target_id
                    .as_deref()
                    .ok_or_else(|| anyhow!("delete change without target id"))?;
                self.remote.delete(collection, id).await
            }
        }
    }

    /// Overwrite every cached collection from the remote source of truth.
    /// A failed read keeps the existing snapshot.
    pub async fn refresh_snapshots(&self) {
        for collection in Collection::ALL {
            match self.remote.read_all(collection.as_str()).await {
                Ok(pairs) => {
                    let records = records_from_remote(pairs);
                    db::save_snapshot(&self.pool, collection, &records).await;
                }
                Err(err) => {
                    warn!(collection = collection.as_str(), ?err, "snapshot refresh failed");
                }
            }
        }
    }

    /// Long-running worker: drains the queue whenever the connection
    /// returns, after a short settle delay so a flapping link does not
    /// trigger back-to-back passes. Also runs one catch-up pass at startup
    /// if already online.
    pub async fn run_reconnect_worker(&self, debounce: Duration) {
        let mut rx = self.connectivity.subscribe();
        let mut was_online = *rx.borrow_and_update();
        if was_online {
            if let Err(err) = self.sync_pending().await {
                error!(?err, "startup sync failed");
            }
        }

        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let online = *rx.borrow_and_update();
            let reconnected = online && !was_online;
            was_online = online;
            if !reconnected {
                continue;
            }
            tokio::time::sleep(debounce).await;
            if let Err(err) = self.sync_pending().await {
                error!(?err, "sync after reconnect failed");
            }
        }
    }
}

/// Map the remote `(key, payload)` pairs into records. Non-object payloads
/// are skipped; the store only ever holds objects under these paths.
pub fn records_from_remote(pairs: Vec<(String, Value)>) -> Vec<Record> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Object(fields) => Some(Record::remote(key, fields)),
            other => {
                warn!(%key, ?other, "skipping non-object remote record");
                None
            }
        })
        .collect()
}
