use serde::{Deserialize, Serialize};

use crate::config::SyncTarget;

use super::QueueRecord;

/// Application-level success code in a remote reply body
pub const SUCCESS_STATUS: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub member_id: String,
    pub timestamp: String,
}

/// Request body for one sync. Built from the whole queue, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub store_id: String,
    pub point_value: u32,
    pub data: Vec<BatchEntry>,
    pub device_id: String,
}

impl SyncBatch {
    pub fn build(target: &SyncTarget<'_>, records: &[QueueRecord], device_id: &str) -> Self {
        Self {
            store_id: target.store_id.to_string(),
            point_value: target.point_value,
            data: records
                .iter()
                .map(|r| BatchEntry {
                    member_id: r.member_id.to_string(),
                    timestamp: r.timestamp.clone(),
                })
                .collect(),
            device_id: device_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Body of the endpoint's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReply {
    pub status: i64,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteReply {
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// Fire-and-forget notice sent after a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSyncNotice {
    pub action: &'static str,
    pub device_id: String,
}

impl LastSyncNotice {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            action: "updateLastSyncTime",
            device_id: device_id.into(),
        }
    }
}
