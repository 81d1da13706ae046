use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::addressbook::{PutOutcome, RemoteVcard, SupportedVcardVersions};
use crate::contact::{Contact, ContactFields, ContactId};
use crate::error::RemoteError;
use crate::mapping::{ConflictChoice, ConflictRecord, Mapping, PendingImport, VersionTag};

/// The local contacts store the sync engine reads from and writes to.
///
/// Implementations are scoped to a single user's single connection: mappings,
/// pending imports and conflicts all belong to the connection the engine was
/// built for.
#[async_trait]
pub trait ContactStore {
    /// Returns the contacts that are not soft-deleted
    async fn contacts(&self) -> Result<Vec<Contact>, Box<dyn Error + Send + Sync>>;
    /// Returns a contact, soft-deleted or not
    async fn contact(&self, id: ContactId) -> Result<Option<Contact>, Box<dyn Error + Send + Sync>>;
    async fn create_contact(&mut self, uid: String, fields: ContactFields) -> Result<Contact, Box<dyn Error + Send + Sync>>;
    /// Replace the whole content payload of a contact: scalars and every child
    /// set swap in one transaction, so a failure can never leave a contact
    /// half-updated
    async fn replace_contact_fields(&mut self, id: ContactId, fields: ContactFields) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn mappings(&self) -> Result<Vec<Mapping>, Box<dyn Error + Send + Sync>>;
    async fn mapping_by_uid(&self, uid: &str) -> Result<Option<Mapping>, Box<dyn Error + Send + Sync>>;
    async fn mapping_for_contact(&self, contact_id: ContactId) -> Result<Option<Mapping>, Box<dyn Error + Send + Sync>>;
    /// Insert or update the mapping of `mapping.contact_id` (a contact has at
    /// most one mapping per connection)
    async fn save_mapping(&mut self, mapping: Mapping) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn pending_imports(&self) -> Result<Vec<PendingImport>, Box<dyn Error + Send + Sync>>;
    /// Insert or update the pending import with this UID
    async fn save_pending_import(&mut self, pending: PendingImport) -> Result<(), Box<dyn Error + Send + Sync>>;
    async fn delete_pending_import(&mut self, uid: &str) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Insert the conflict, or refresh the still-unresolved record of the same
    /// UID (at most one conflict per mapping is open at a time)
    async fn save_conflict(&mut self, conflict: ConflictRecord) -> Result<(), Box<dyn Error + Send + Sync>>;
    /// The oldest conflict of this mapping that has not been resolved yet
    async fn unresolved_conflict(&self, uid: &str) -> Result<Option<ConflictRecord>, Box<dyn Error + Send + Sync>>;
    async fn mark_conflict_resolved(&mut self, uid: &str, choice: ConflictChoice) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Stamp a successful sync on the connection, clearing any recorded error
    async fn record_sync_success(&mut self, at: DateTime<Utc>) -> Result<(), Box<dyn Error + Send + Sync>>;
    /// Record a connection-level failure (an already-categorized user message)
    async fn record_sync_error(&mut self, message: &str, at: DateTime<Utc>) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Where photo bytes live.
///
/// Contact fields only carry an opaque photo reference; this trait turns it
/// into transportable content and back.
#[async_trait]
pub trait PhotoStore {
    /// Resolve a photo reference into a `data:` URI, or `None` when the
    /// reference points to nothing
    async fn read_photo_as_data_uri(&self, photo_ref: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;
    /// Store photo content and return the reference to keep in the contact
    async fn store_photo(&mut self, data_uri: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// A [`PhotoStore`] that stores nothing: references resolve to nothing, and
/// incoming photos keep travelling inline as `data:` URIs
pub struct NoPhotos;

#[async_trait]
impl PhotoStore for NoPhotos {
    async fn read_photo_as_data_uri(&self, _photo_ref: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }
    async fn store_photo(&mut self, data_uri: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(data_uri.to_string())
    }
}

/// A remote CardDAV endpoint, i.e. what discovery yields address books from
#[async_trait]
pub trait CardDavSource {
    type AddressBook: DavAddressBook + Send + Sync;

    /// Discover the address books available behind this source.
    /// This is a possibly long process (multiple PROPFIND round-trips)
    async fn discover_address_books(&self) -> Result<Vec<Self::AddressBook>, RemoteError>;
}

/// One remote address book collection
#[async_trait]
pub trait DavAddressBook {
    fn url(&self) -> &Url;
    fn name(&self) -> &str;
    /// Which vCard versions the server advertises for this collection
    fn supported_versions(&self) -> SupportedVcardVersions;

    /// List every vCard of the collection (ETags and content) in one request
    async fn list_vcards(&self) -> Result<Vec<RemoteVcard>, RemoteError>;
    /// Create a brand new resource named `filename`. Fails with 412 if it
    /// already exists
    async fn create_vcard(&self, filename: &str, content: &str) -> Result<PutOutcome, RemoteError>;
    /// Overwrite an existing resource, guarded by its last known ETag when one
    /// is given. Fails with 412 if the server-side resource changed since
    async fn update_vcard(&self, url: &Url, etag: Option<&VersionTag>, content: &str) -> Result<PutOutcome, RemoteError>;
    async fn delete_vcard(&self, url: &Url) -> Result<(), RemoteError>;
}
