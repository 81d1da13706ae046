//! CardDAV account settings and per-connection sync state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One configured CardDAV account.
///
/// Credentials arrive ready to use; storing and protecting them is the job of
/// the embedding application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    /// Where discovery starts (the server root or any bootstrap URL the user gave)
    pub server_url: Url,
    pub username: String,
    pub password: String,
    /// When false, local edits are only stamped, never pushed immediately
    pub sync_enabled: bool,
    /// When true, newly created contacts are exported right away
    pub auto_export: bool,
    /// Polling cadence hint for the embedding scheduler. The engine itself never polls
    pub poll_interval_minutes: Option<u32>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Categorized, user-displayable message of the last connection-level failure
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(id: String, server_url: Url, username: String, password: String) -> Self {
        Self {
            id,
            server_url,
            username,
            password,
            sync_enabled: true,
            auto_export: false,
            poll_interval_minutes: None,
            last_synced_at: None,
            last_error: None,
            last_error_at: None,
        }
    }
}
