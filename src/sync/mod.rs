//! Synchronization between a local contact store and a CardDAV server
//!
//! The [`SyncEngine`] owns the mapping bookkeeping of one connection: which
//! local contact corresponds to which server resource, which side changed
//! since the last pass, and what to do about it. It never deletes data on
//! either side on its own; ambiguous situations become [conflicts](crate::mapping::ConflictRecord)
//! or [pending imports](crate::mapping::PendingImport) that the embedding
//! application settles.

pub mod sync_progress;
mod auto_export;
mod discover;

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::Utc;
use reqwest::StatusCode;
use url::Url;

use crate::addressbook::{PutOutcome, RemoteVcard};
use crate::connection::Connection;
use crate::contact::{Contact, ContactFields};
use crate::error::{categorize_dyn, RemoteError};
use crate::hash::content_hash;
use crate::mapping::{ConflictChoice, ConflictRecord, Mapping, SyncStatus, VersionTag};
use crate::traits::{CardDavSource, ContactStore, DavAddressBook, PhotoStore};
use crate::vcard::{self, ParsedVcard};
use sync_progress::{FeedbackSender, SyncEvent, SyncPhase, SyncProgress};

/// Serializes the sync operations of one connection.
///
/// Overlapping runs (say, a manual sync racing a scheduled one) would
/// interleave their mapping and ETag bookkeeping. Every engine operation that
/// writes mappings takes this lock first. Clones share the underlying lock:
/// keep one per connection and hand clones to whoever syncs it.
#[derive(Clone, Default)]
pub struct ConnectionLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl ConnectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }
}


/// What a sync run did, in numbers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// New server-side contacts that became pending imports
    pub imported: usize,
    /// Local contacts created on the server
    pub exported: usize,
    /// Local contacts overwritten with server data
    pub updated_locally: usize,
    /// Server resources overwritten with local data
    pub updated_remotely: usize,
    /// Conflicts detected (both sides changed since the last sync)
    pub conflicts: usize,
    /// Items that could not be processed (the sync went on without them)
    pub errors: usize,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

impl Display for SyncSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{} imported, {} exported, {} updated locally, {} updated remotely, {} conflicts, {} errors",
            self.imported, self.exported, self.updated_locally, self.updated_remotely, self.conflicts, self.errors)
    }
}


/// How to settle a detected conflict
#[derive(Clone, Debug)]
pub enum ConflictResolution {
    /// The local version wins. It will be pushed on the next sync
    KeepLocal,
    /// The remote snapshot wins and overwrites the local contact
    KeepRemote,
    /// A payload merged by the user replaces the local contact and will be pushed
    Merged(ContactFields),
}


/// What parts of a run [`SyncEngine::run_sync`] should perform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncMode {
    Bidirectional,
    FromServer,
    ToServer,
    DiscoverOnly,
}

impl SyncMode {
    /// Whether this run needs the server listing at all
    fn lists_the_server(self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::FromServer | SyncMode::DiscoverOnly)
    }
    fn pulls(self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::FromServer)
    }
    fn pushes(self) -> bool {
        matches!(self, SyncMode::Bidirectional | SyncMode::ToServer)
    }
}

impl Display for SyncMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            SyncMode::Bidirectional => write!(f, "sync"),
            SyncMode::FromServer => write!(f, "pull"),
            SyncMode::ToServer => write!(f, "push"),
            SyncMode::DiscoverOnly => write!(f, "discovery"),
        }
    }
}


/// A vCard from a server listing, decoded once for all passes
pub(crate) struct RemoteEntry {
    pub uid: String,
    pub card: RemoteVcard,
    pub parsed: ParsedVcard,
}

/// The authoritative identity of a vCard we just created on the server
struct CreatedCard {
    url: Url,
    etag: Option<VersionTag>,
    /// Set when the server rewrote the UID we sent
    server_uid: Option<String>,
}


/// A sync engine for one CardDAV connection.
///
/// It is bound to a local [`ContactStore`], a [`PhotoStore`], and a remote
/// [`CardDavSource`] (usually a [`Client`](crate::client::Client), or a
/// [`MockSource`](crate::addressbook::mock_addressbook::MockSource) in tests).
/// Only the first address book the source discovers is synchronized.
pub struct SyncEngine<S, P, R>
where
    S: ContactStore + Send + Sync,
    P: PhotoStore + Send + Sync,
    R: CardDavSource + Send + Sync,
{
    source: R,
    store: S,
    photos: P,
    connection: Connection,
    lock: ConnectionLock,
}

impl<S, P, R> SyncEngine<S, P, R>
where
    S: ContactStore + Send + Sync,
    P: PhotoStore + Send + Sync,
    R: CardDavSource + Send + Sync,
{
    pub fn new(source: R, store: S, photos: P, connection: Connection, lock: ConnectionLock) -> Self {
        Self { source, store, photos, connection, lock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Perform a full bidirectional sync: discovery, then pull, then push
    pub async fn sync(&mut self) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        self.run_sync(SyncMode::Bidirectional, &mut SyncProgress::new()).await
    }

    /// Same as [`Self::sync`], but the caller can follow the progression on `feedback`
    pub async fn sync_with_feedback(&mut self, feedback: FeedbackSender) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        self.run_sync(SyncMode::Bidirectional, &mut SyncProgress::new_with_feedback_channel(feedback)).await
    }

    /// Apply remote changes locally (discovery and pull), without pushing anything
    pub async fn sync_from_server(&mut self) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        self.run_sync(SyncMode::FromServer, &mut SyncProgress::new()).await
    }

    /// Send local changes to the server, without touching local data
    pub async fn sync_to_server(&mut self) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        self.run_sync(SyncMode::ToServer, &mut SyncProgress::new()).await
    }

    /// Only look for server-side contacts that are not known locally yet.
    ///
    /// New ones become [pending imports](crate::mapping::PendingImport), to be
    /// materialized by [`Self::import_pending`].
    pub async fn discover(&mut self) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        self.run_sync(SyncMode::DiscoverOnly, &mut SyncProgress::new()).await
    }

    /// Settle a conflict.
    ///
    /// Keeping the remote side overwrites the local contact with the snapshot
    /// taken when the conflict was detected. Keeping the local side (or a
    /// merged payload) leaves the mapping pending, so the next push sends it.
    /// This is the only path that clears a conflict.
    pub async fn resolve_conflict(&mut self, uid: &str, resolution: ConflictResolution) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.acquire().await;

        let conflict = self.store.unresolved_conflict(uid).await?
            .ok_or_else(|| format!("No open conflict for UID {}", uid))?;
        let mut mapping = self.store.mapping_by_uid(uid).await?
            .ok_or_else(|| format!("No mapping for UID {}", uid))?;
        let now = Utc::now();

        let choice = match resolution {
            ConflictResolution::KeepLocal => {
                mapping.status = SyncStatus::Pending;
                mapping.last_local_change = Some(now);
                // The content may be back to what the server last saw. Clearing
                // the hash forces the next push to send it anyway, so both
                // sides converge for sure.
                mapping.local_version = None;
                ConflictChoice::KeepLocal
            }
            ConflictResolution::KeepRemote => {
                let mut fields: ContactFields = serde_json::from_value(conflict.remote_snapshot.clone())?;
                self.intern_photo(&mut fields).await?;
                let local_version = content_hash(&fields);
                self.store.replace_contact_fields(mapping.contact_id, fields).await?;
                mapping.status = SyncStatus::Synced;
                mapping.last_synced_at = Some(now);
                mapping.local_version = Some(local_version);
                ConflictChoice::KeepRemote
            }
            ConflictResolution::Merged(mut fields) => {
                self.intern_photo(&mut fields).await?;
                self.store.replace_contact_fields(mapping.contact_id, fields).await?;
                mapping.status = SyncStatus::Pending;
                mapping.last_local_change = Some(now);
                mapping.local_version = None;
                ConflictChoice::Merged
            }
        };

        self.store.save_mapping(mapping).await?;
        self.store.mark_conflict_resolved(uid, choice).await?;
        log::info!("Conflict on {} settled with {:?}", uid, choice);
        Ok(())
    }

    async fn run_sync(&mut self, mode: SyncMode, progress: &mut SyncProgress) -> Result<SyncSummary, Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.acquire().await;
        progress.feedback(SyncEvent::Started);
        progress.info(&format!("Starting a {} of connection {}", mode, self.connection.id));

        let mut summary = SyncSummary::default();
        match self.run_sync_inner(mode, progress, &mut summary).await {
            Ok(()) => {
                self.store.record_sync_success(Utc::now()).await?;
                progress.info(&format!("Finished the {} of connection {}: {}", mode, self.connection.id, summary));
                progress.feedback(SyncEvent::Finished { success: progress.is_success() });
                Ok(summary)
            }
            Err(err) => {
                let category = categorize_dyn(err.as_ref());
                progress.error(&format!("The {} of connection {} aborted ({}): {}", mode, self.connection.id, category, err));
                self.store.record_sync_error(category.user_message(), Utc::now()).await?;
                progress.feedback(SyncEvent::Finished { success: false });
                Err(err)
            }
        }
    }

    /// The actual passes. Failures bubbling up from here abort the whole run;
    /// failures on a single vCard are counted and the run goes on.
    async fn run_sync_inner(&mut self, mode: SyncMode, progress: &mut SyncProgress, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let book = self.first_address_book().await?;

        if mode.lists_the_server() {
            let cards = book.list_vcards().await?;
            let entries = self.decode_listing(cards, progress, summary);
            self.discovery_pass(&entries, progress, summary).await?;
            if mode.pulls() {
                self.pull_pass(&entries, progress, summary).await;
            }
        }
        if mode.pushes() {
            self.push_pass(&book, progress, summary).await?;
        }
        Ok(())
    }

    /// The single address book this connection synchronizes with
    async fn first_address_book(&self) -> Result<R::AddressBook, RemoteError> {
        let mut books = self.source.discover_address_books().await?;
        if books.is_empty() {
            return Err(RemoteError::Other("no address book found on this server".to_string()));
        }
        if books.len() > 1 {
            log::info!("This server has {} address books, only {:?} will be synchronized", books.len(), books[0].name());
        }
        Ok(books.remove(0))
    }

    /// Decode a server listing once for all passes.
    ///
    /// vCards without a UID cannot be tracked across syncs; they are counted
    /// as errors and left alone. Should several resources share a UID, only
    /// the first one is considered.
    fn decode_listing(&self, cards: Vec<RemoteVcard>, progress: &mut SyncProgress, summary: &mut SyncSummary) -> Vec<RemoteEntry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(cards.len());
        for card in cards {
            let parsed = vcard::parse(&card.data);
            let uid = match &parsed.uid {
                Some(uid) => uid.clone(),
                None => {
                    progress.error(&format!("The vCard at {} has no UID, it cannot be synchronized", card.url));
                    summary.errors += 1;
                    continue;
                }
            };
            if seen.insert(uid.clone()) == false {
                progress.warn(&format!("Several resources share the UID {}, ignoring the one at {}", uid, card.url));
                continue;
            }
            entries.push(RemoteEntry { uid, card, parsed });
        }
        entries
    }

    /// Apply remote changes to mapped contacts
    async fn pull_pass(&mut self, entries: &[RemoteEntry], progress: &mut SyncProgress, summary: &mut SyncSummary) {
        let total = entries.len();
        for (n, entry) in entries.iter().enumerate() {
            progress.feedback(SyncEvent::InProgress {
                phase: SyncPhase::Pull,
                current: n + 1,
                total,
                contact: entry.parsed.display_name(),
            });
            if let Err(err) = self.pull_one(entry, summary).await {
                progress.error(&format!("Unable to pull {}: {}", entry.uid, err));
                summary.errors += 1;
            }
        }
    }

    async fn pull_one(&mut self, entry: &RemoteEntry, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut mapping = match self.store.mapping_by_uid(&entry.uid).await? {
            Some(mapping) => mapping,
            // Not mapped: this is a pending import, the discovery pass took care of it
            None => return Ok(()),
        };
        if mapping.etag.as_ref() == Some(&entry.card.etag) {
            // The server side has not moved since the last sync
            return Ok(());
        }

        let now = Utc::now();
        if mapping.locally_changed() {
            // Both sides changed: snapshot them and let the user settle it.
            // The new remote ETag is adopted in the same write, so the same
            // server state cannot re-create this conflict on the next run.
            let contact = self.store.contact(mapping.contact_id).await?
                .ok_or_else(|| format!("The mapping of {} points to a contact that does not exist", entry.uid))?;
            let conflict = ConflictRecord::new(
                mapping.uid.clone(),
                mapping.contact_id,
                serde_json::to_value(&contact.fields)?,
                serde_json::to_value(&entry.parsed.fields)?,
                Some(entry.card.etag.clone()),
            );
            self.store.save_conflict(conflict).await?;
            mapping.status = SyncStatus::Conflict;
            mapping.etag = Some(entry.card.etag.clone());
            mapping.href = Some(entry.card.url.clone());
            mapping.last_remote_change = Some(now);
            mapping.remote_version = Some(content_hash(&entry.parsed.fields));
            self.store.save_mapping(mapping).await?;
            summary.conflicts += 1;
            log::info!("Conflict on {}: changed both locally and on the server", entry.uid);
        } else {
            // Only the server side changed: overwrite the local contact
            let mut fields = entry.parsed.fields.clone();
            let remote_version = content_hash(&fields);
            self.intern_photo(&mut fields).await?;
            let local_version = content_hash(&fields);
            self.store.replace_contact_fields(mapping.contact_id, fields).await?;
            mapping.status = SyncStatus::Synced;
            mapping.etag = Some(entry.card.etag.clone());
            mapping.href = Some(entry.card.url.clone());
            mapping.last_remote_change = Some(now);
            mapping.last_synced_at = Some(now);
            mapping.local_version = Some(local_version);
            mapping.remote_version = Some(remote_version);
            self.store.save_mapping(mapping).await?;
            summary.updated_locally += 1;
        }
        Ok(())
    }

    /// Send local changes to the server
    async fn push_pass(&mut self, book: &R::AddressBook, progress: &mut SyncProgress, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mappings = self.store.mappings().await?;
        let contacts = self.store.contacts().await?;

        let mapped: HashSet<_> = mappings.iter().map(|mapping| mapping.contact_id).collect();
        let to_push: Vec<Mapping> = mappings.into_iter()
            // A conflicted mapping sits out of sync until the user settles it
            .filter(|mapping| mapping.status != SyncStatus::Conflict)
            .filter(|mapping| mapping.status == SyncStatus::Pending || mapping.locally_changed())
            .collect();
        let unmapped: Vec<Contact> = contacts.into_iter()
            .filter(|contact| mapped.contains(&contact.id) == false)
            .collect();

        let total = to_push.len() + unmapped.len();
        let mut current = 0;

        for mapping in to_push {
            current += 1;
            let contact = match self.store.contact(mapping.contact_id).await {
                Ok(Some(contact)) => contact,
                Ok(None) => {
                    progress.error(&format!("The mapping of {} points to a contact that does not exist", mapping.uid));
                    summary.errors += 1;
                    continue;
                }
                Err(err) => {
                    progress.error(&format!("Unable to fetch the contact for {}: {}", mapping.uid, err));
                    summary.errors += 1;
                    continue;
                }
            };
            progress.feedback(SyncEvent::InProgress {
                phase: SyncPhase::Push,
                current,
                total,
                contact: contact_label(&contact),
            });
            if contact.is_deleted() {
                // Soft-deleted contacts sit out of sync
                continue;
            }
            if let Err(err) = self.push_mapped(book, mapping, &contact, summary).await {
                progress.error(&format!("Unable to push {}: {}", contact_label(&contact), err));
                summary.errors += 1;
            }
        }

        for contact in unmapped {
            current += 1;
            progress.feedback(SyncEvent::InProgress {
                phase: SyncPhase::Push,
                current,
                total,
                contact: contact_label(&contact),
            });
            if let Err(err) = self.export_contact(book, &contact, summary).await {
                progress.error(&format!("Unable to export {}: {}", contact_label(&contact), err));
                summary.errors += 1;
            }
        }
        Ok(())
    }

    /// Push one mapped contact. Precondition failures are not errors: the
    /// server side moved on, and the next pull will turn this into a conflict.
    async fn push_mapped(&mut self, book: &R::AddressBook, mut mapping: Mapping, contact: &Contact, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let hash = content_hash(&contact.fields);
        let now = Utc::now();

        if mapping.local_version.as_deref() == Some(hash.as_str()) {
            // Stamped as changed, but the content is identical to what the
            // server already has. No network round-trip for this one.
            log::debug!("{} has no actual change, skipping it", mapping.uid);
            mapping.status = SyncStatus::Synced;
            mapping.last_synced_at = Some(now);
            self.store.save_mapping(mapping).await?;
            return Ok(());
        }

        let photo = self.resolve_photo(&contact.fields).await;
        let content = vcard::build(&mapping.uid, &contact.fields, book.supported_versions().preferred(), photo.as_deref());

        match mapping.href.clone() {
            Some(href) => {
                let outcome = match book.update_vcard(&href, mapping.etag.as_ref(), &content).await {
                    Ok(outcome) => outcome,
                    Err(RemoteError::Http { status, .. }) if status == StatusCode::PRECONDITION_FAILED => {
                        log::info!("{} also changed on the server, deferring to conflict detection", mapping.uid);
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                };
                mapping.href = Some(outcome.url);
                mapping.etag = outcome.etag;
                summary.updated_remotely += 1;
            }
            None => {
                let created = self.create_and_reconcile(book, &mapping.uid, &contact.fields, &content).await?;
                if let Some(server_uid) = created.server_uid {
                    if server_uid != mapping.uid {
                        log::info!("The server stored {} under UID {}", mapping.uid, server_uid);
                        mapping.uid = server_uid;
                    }
                }
                mapping.href = Some(created.url);
                mapping.etag = created.etag;
                summary.exported += 1;
            }
        }

        mapping.status = SyncStatus::Synced;
        mapping.last_synced_at = Some(now);
        mapping.local_version = Some(hash.clone());
        mapping.remote_version = Some(hash);
        self.store.save_mapping(mapping).await?;
        Ok(())
    }

    /// Create a server resource for a contact that has no mapping yet
    async fn export_contact(&mut self, book: &R::AddressBook, contact: &Contact, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let uid = effective_uid(contact);
        let hash = content_hash(&contact.fields);
        let photo = self.resolve_photo(&contact.fields).await;
        let content = vcard::build(&uid, &contact.fields, book.supported_versions().preferred(), photo.as_deref());

        let created = self.create_and_reconcile(book, &uid, &contact.fields, &content).await?;
        let now = Utc::now();
        let mapping = Mapping {
            contact_id: contact.id,
            uid: created.server_uid.unwrap_or(uid),
            href: Some(created.url),
            etag: created.etag,
            status: SyncStatus::Synced,
            last_local_change: None,
            last_synced_at: Some(now),
            last_remote_change: None,
            local_version: Some(hash.clone()),
            remote_version: Some(hash),
        };
        self.store.save_mapping(mapping).await?;
        summary.exported += 1;
        Ok(())
    }

    /// PUT a brand new vCard and settle on its authoritative URL/ETag/UID
    async fn create_and_reconcile(&self, book: &R::AddressBook, uid: &str, fields: &ContactFields, content: &str) -> Result<CreatedCard, Box<dyn Error + Send + Sync>> {
        let filename = vcard_filename(uid);
        let outcome = book.create_vcard(&filename, content).await?;
        Ok(self.adopt_put_outcome(book, &filename, outcome, fields).await)
    }

    /// Decide what to record about a vCard we just created.
    ///
    /// Some servers (webmail providers, mostly) grant the creation but store
    /// the card under their own URL and UID. They give themselves away by
    /// answering without an ETag, or with a diverging Location. In that case
    /// the card is looked up again by full name among the entries no mapping
    /// owns yet. This is best effort: whatever fails here, the export itself
    /// has succeeded, so the response data is kept as a fallback.
    async fn adopt_put_outcome(&self, book: &R::AddressBook, filename: &str, outcome: PutOutcome, fields: &ContactFields) -> CreatedCard {
        let expected = expected_resource_url(book.url(), filename);
        let rewritten = outcome.etag.is_none()
            || expected.map(|expected| expected != outcome.url).unwrap_or(false);
        if rewritten == false {
            return CreatedCard { url: outcome.url, etag: outcome.etag, server_uid: None };
        }

        log::debug!("The server may have rewritten {} on creation, listing the collection again to find it", filename);
        match self.locate_created_card(book, fields).await {
            Ok(Some((card, server_uid))) => CreatedCard { url: card.url, etag: Some(card.etag), server_uid },
            Ok(None) => {
                log::warn!("Could not locate the new vCard on the server, keeping {} as its URL", outcome.url);
                CreatedCard { url: outcome.url, etag: outcome.etag, server_uid: None }
            }
            Err(err) => {
                log::warn!("Unable to list the collection after creating a vCard ({}), keeping {} as its URL", err, outcome.url);
                CreatedCard { url: outcome.url, etag: outcome.etag, server_uid: None }
            }
        }
    }

    /// Find a just-created vCard by its full name, among the entries that no
    /// mapping owns. Gives up when the name is ambiguous.
    async fn locate_created_card(&self, book: &R::AddressBook, fields: &ContactFields) -> Result<Option<(RemoteVcard, Option<String>)>, Box<dyn Error + Send + Sync>> {
        let target = fields.display_name().unwrap_or_else(|| "Unknown".to_string());
        let mapped_hrefs: HashSet<Url> = self.store.mappings().await?
            .into_iter()
            .filter_map(|mapping| mapping.href)
            .collect();

        let mut matches = Vec::new();
        for card in book.list_vcards().await? {
            if mapped_hrefs.contains(&card.url) {
                continue;
            }
            let parsed = vcard::parse(&card.data);
            if parsed.full_name.as_deref() == Some(target.as_str()) {
                matches.push((card, parsed.uid));
            }
        }
        if matches.len() > 1 {
            log::warn!("{} unmapped vCards are named {:?}, not adopting any of them", matches.len(), target);
            return Ok(None);
        }
        Ok(matches.pop())
    }

    /// The photo to embed in an outgoing vCard, if any.
    ///
    /// `data:` URIs embed as they are; opaque references go through the photo
    /// store. A photo that cannot be read is dropped from the export rather
    /// than failing it.
    async fn resolve_photo(&self, fields: &ContactFields) -> Option<String> {
        let photo_ref = fields.photo.as_deref()?;
        if photo_ref.starts_with("data:") {
            return Some(photo_ref.to_string());
        }
        match self.photos.read_photo_as_data_uri(photo_ref).await {
            Ok(photo) => photo,
            Err(err) => {
                log::warn!("Unable to read the photo {}: {}. Exporting without it", photo_ref, err);
                None
            }
        }
    }

    /// Swap an inline `data:` URI for a photo store reference, before a remote
    /// payload lands in the local store
    async fn intern_photo(&mut self, fields: &mut ContactFields) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(photo) = fields.photo.clone() {
            if photo.starts_with("data:") {
                fields.photo = Some(self.photos.store_photo(&photo).await?);
            }
        }
        Ok(())
    }
}


/// The name a contact goes by in logs and progress feedback
fn contact_label(contact: &Contact) -> String {
    contact.fields.display_name().unwrap_or_else(|| contact.uid.clone())
}

/// The UID a contact is exported under. Local contacts normally carry one
/// already; an empty one gets a fresh UUID.
fn effective_uid(contact: &Contact) -> String {
    if contact.uid.trim().is_empty() {
        uuid::Uuid::new_v4().to_hyphenated().to_string()
    } else {
        contact.uid.clone()
    }
}

/// The filename a new vCard is PUT under
fn vcard_filename(uid: &str) -> String {
    format!("{}.vcf", sanitize_filename::sanitize(uid))
}

/// The URL a resource named `filename` should end up at inside `collection`
fn expected_resource_url(collection: &Url, filename: &str) -> Option<Url> {
    let mut url = collection.clone();
    url.path_segments_mut().ok()?.pop_if_empty().push(filename);
    Some(url)
}
