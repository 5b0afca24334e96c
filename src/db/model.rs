use crate::model::{Collection, Operation, PendingChange};
use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

/// Raw queue row as stored. Converted into a [`PendingChange`] after the
/// text columns are parsed; rows with unrecognized shapes are skipped, not
/// surfaced as errors.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub change_id: String,
    pub collection: String,
    pub operation: String,
    pub target_id: Option<String>,
    pub payload: Option<String>,
    pub queued_at_ms: i64,
    pub retry_count: i32,
}

impl ChangeRow {
    pub fn into_change(self) -> Option<PendingChange> {
        let Some(collection) = Collection::parse(&self.collection) else {
            warn!(change_id = %self.change_id, collection = %self.collection, "skipping queue row with unknown collection");
            return None;
        };
        let Some(operation) = Operation::parse(&self.operation) else {
            warn!(change_id = %self.change_id, operation = %self.operation, "skipping queue row with unknown operation");
            return None;
        };
        let payload = match self.payload {
            Some(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => Some(map),
                Err(err) => {
                    warn!(change_id = %self.change_id, ?err, "skipping queue row with unreadable payload");
                    return None;
                }
            },
            None => None,
        };
        let queued_at = Utc
            .timestamp_millis_opt(self.queued_at_ms)
            .single()
            .unwrap_or_else(Utc::now);
        Some(PendingChange {
            change_id: self.change_id,
            collection,
            operation,
            target_id: self.target_id,
            payload,
            queued_at,
            retry_count: self.retry_count,
        })
    }
}
