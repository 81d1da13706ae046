//! Sync bookkeeping: the rows that bind local contacts to remote vCard resources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::contact::ContactId;

/// A VersionTag is basically a CardDAV `etag`. Whenever it changes, this means the data has changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionTag {
    tag: String,
}

impl From<String> for VersionTag {
    fn from(tag: String) -> VersionTag {
        Self { tag }
    }
}

impl VersionTag {
    /// Get the inner version tag (usually a WebDAV `etag`)
    pub fn as_str(&self) -> &str {
        &self.tag
    }

    /// Generate a random VersionTag (mock servers mint one on every write)
    pub fn random() -> Self {
        let random = uuid::Uuid::new_v4().to_hyphenated().to_string();
        Self { tag: random }
    }
}

/// Describes whether a mapped contact is in sync with its remote resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Local changes (or a brand new contact) are waiting to be pushed
    Pending,
    /// Local and remote agreed the last time they were compared
    Synced,
    /// Both sides changed since the last sync. Stays put until a resolution is applied
    Conflict,
}

/// The bookkeeping row binding one local contact to one remote vCard resource.
///
/// Invariant: whenever a sync pass observes a new server ETag (pull overwrite,
/// conflict detection, or push), `etag` is updated in the same write. This is
/// what keeps an unchanged server from re-triggering the same conflict on the
/// next pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub contact_id: ContactId,
    /// The vCard UID, the key both sides know this contact by
    pub uid: String,
    /// Absolute URL of the vCard resource. `None` until the first export
    pub href: Option<Url>,
    /// Last known server ETag
    pub etag: Option<VersionTag>,
    pub status: SyncStatus,
    pub last_local_change: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_remote_change: Option<DateTime<Utc>>,
    /// Content hash of the local payload as last synchronized
    pub local_version: Option<String>,
    /// Content hash of the remote payload as last seen
    pub remote_version: Option<String>,
}

impl Mapping {
    /// A mapping for a contact that exists locally but was never pushed yet
    pub fn new_pending(contact_id: ContactId, uid: String) -> Self {
        Self {
            contact_id,
            uid,
            href: None,
            etag: None,
            status: SyncStatus::Pending,
            last_local_change: Some(Utc::now()),
            last_synced_at: None,
            last_remote_change: None,
            local_version: None,
            remote_version: None,
        }
    }

    /// Whether the local side changed since the last successful sync
    pub fn locally_changed(&self) -> bool {
        match (self.last_local_change, self.last_synced_at) {
            (Some(changed), Some(synced)) => changed > synced,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// A server vCard that discovery has seen but that has not been imported yet.
///
/// `data` keeps the raw vCard text, so importing needs no further network
/// round-trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingImport {
    pub uid: String,
    /// Best-effort display name, for the import UI
    pub display_name: String,
    pub href: Url,
    pub etag: Option<VersionTag>,
    pub data: String,
    pub discovered_at: DateTime<Utc>,
}

/// What the user decided about a conflict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictChoice {
    KeepLocal,
    KeepRemote,
    Merged,
}

/// The two sides of a detected conflict, frozen at detection time.
///
/// Snapshots are full JSON copies of the contact fields, so resolving never
/// depends on state that may have moved on since.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub uid: String,
    pub contact_id: ContactId,
    pub local_snapshot: serde_json::Value,
    pub remote_snapshot: serde_json::Value,
    pub remote_etag: Option<VersionTag>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<ConflictChoice>,
}

impl ConflictRecord {
    pub fn new(
        uid: String,
        contact_id: ContactId,
        local_snapshot: serde_json::Value,
        remote_snapshot: serde_json::Value,
        remote_etag: Option<VersionTag>,
    ) -> Self {
        Self {
            uid,
            contact_id,
            local_snapshot,
            remote_snapshot,
            remote_etag,
            detected_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
