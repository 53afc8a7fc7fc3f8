//! Data models for queued scans and sync payloads.
//!
//! - `MemberId`: a validated 14-digit member identifier
//! - `NewRecord`, `QueueRecord`: a scan before and after it is queued
//! - `SyncBatch`, `BatchEntry`: the request body for one sync
//! - `RemoteReply`, `LastSyncNotice`: the remaining wire types

pub mod batch;
pub mod record;

pub use batch::{BatchEntry, LastSyncNotice, RemoteReply, SyncBatch, SUCCESS_STATUS};
pub use record::{MemberId, NewRecord, QueueRecord, MEMBER_ID_LEN};
