use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Member identifiers are exactly this many ASCII digits
pub const MEMBER_ID_LEN: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberId(String);

impl MemberId {
    /// Parse raw scanner input. Surrounding whitespace (including the
    /// scanner's line terminator) is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != MEMBER_ID_LEN || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_member_id(format!(
                "expected {} digits, got {:?}",
                MEMBER_ID_LEN, trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MemberId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MemberId> for String {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

/// A scan that has been validated but not yet given a queue key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub member_id: MemberId,
    pub timestamp: String,
    pub device_id: String,
}

impl NewRecord {
    pub fn new(member_id: MemberId, scanned_at: DateTime<Utc>, device_id: String) -> Self {
        Self {
            member_id,
            timestamp: scanned_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            device_id,
        }
    }
}

/// One pending scan as stored in the durable queue.
///
/// Records are ordered by `id`, which is assigned by the queue and strictly
/// increases for the lifetime of the device. The `timestamp` is reported to
/// the remote side as-is and never used for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: u64,
    pub member_id: MemberId,
    pub timestamp: String,
    pub device_id: String,
}

impl QueueRecord {
    pub fn from_new(id: u64, record: NewRecord) -> Self {
        Self {
            id,
            member_id: record.member_id,
            timestamp: record.timestamp,
            device_id: record.device_id,
        }
    }
}
