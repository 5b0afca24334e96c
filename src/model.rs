use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The record collections replicated between the local store and the
/// remote database. The set is closed: every snapshot, queue entry and
/// remote path is keyed by one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Supply,
    Stock,
    Recipes,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Supply, Collection::Stock, Collection::Recipes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Supply => "supply",
            Collection::Stock => "stock",
            Collection::Recipes => "recipes",
        }
    }

    pub fn parse(s: &str) -> Option<Collection> {
        match s {
            "supply" => Some(Collection::Supply),
            "stock" => Some(Collection::Stock),
            "recipes" => Some(Collection::Recipes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "create" => Some(Operation::Create),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Record identifier. `Remote` keys are assigned by the hosted store and
/// are the only ones safe to use in remote paths; `Local` ids exist purely
/// so an optimistic record can be addressed before its first sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RecordId {
    Local(String),
    Remote(String),
}

impl RecordId {
    pub fn new_local() -> RecordId {
        RecordId::Local(format!("temp_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Local(id) | RecordId::Remote(id) => id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }
}

/// One stored item within a collection. Fields are opaque to the sync
/// machinery; the catalog module gives them shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn remote(id: impl Into<String>, fields: Map<String, Value>) -> Record {
        Record {
            id: RecordId::Remote(id.into()),
            fields,
        }
    }
}

/// A queued mutation awaiting confirmation against the remote store.
/// Confirmed entries are deleted, never flagged; `retry_count` survives
/// daemon restarts because the queue lives in SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub change_id: String,
    pub collection: Collection,
    pub operation: Operation,
    pub target_id: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub queued_at: DateTime<Utc>,
    pub retry_count: i32,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another pass already held the in-flight guard.
    AlreadyRunning,
    /// Pass ran to completion (possibly over an empty queue).
    Completed(SyncReport),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub dropped: usize,
}
