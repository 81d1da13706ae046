//! An in-memory contact store, for tests and for embedding without a database

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::contact::{Contact, ContactFields, ContactId};
use crate::mapping::{ConflictChoice, ConflictRecord, Mapping, PendingImport};
use crate::traits::{ContactStore, PhotoStore};

/// A [`ContactStore`] and [`PhotoStore`] backed by plain maps.
///
/// Clones share their state, so a test can inspect the very store the engine
/// writes to. Like a database would, it assigns contact and child row ids on
/// insert.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_contact_id: ContactId,
    next_child_id: i64,
    next_photo_id: u32,

    contacts: HashMap<ContactId, Contact>,
    mappings: HashMap<ContactId, Mapping>,
    pending: HashMap<String, PendingImport>,
    conflicts: Vec<ConflictRecord>,
    photos: HashMap<String, String>,

    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn assign_child_ids(&mut self, fields: &mut ContactFields) {
        macro_rules! assign {
            ($children:expr) => {
                for child in $children.iter_mut() {
                    if child.id.is_none() {
                        self.next_child_id += 1;
                        child.id = Some(self.next_child_id);
                    }
                }
            };
        }
        assign!(fields.phones);
        assign!(fields.emails);
        assign!(fields.addresses);
        assign!(fields.urls);
        assign!(fields.im_handles);
        assign!(fields.geo_locations);
        assign!(fields.dates);
        assign!(fields.custom_fields);
        assign!(fields.relations);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft-delete a contact right away (not async, so it can run from inside
    /// a mock hook during a request)
    pub fn soft_delete_contact(&self, id: ContactId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(contact) = inner.contacts.get_mut(&id) {
            contact.deleted_at = Some(Utc::now());
        }
    }

    pub fn find_contact_by_uid(&self, uid: &str) -> Option<Contact> {
        self.inner.lock().unwrap().contacts.values()
            .find(|contact| contact.uid == uid)
            .cloned()
    }

    pub fn contact_count(&self) -> usize {
        self.inner.lock().unwrap().contacts.values()
            .filter(|contact| contact.is_deleted() == false)
            .count()
    }

    pub fn conflict_count(&self) -> usize {
        self.inner.lock().unwrap().conflicts.len()
    }

    pub fn conflicts_for(&self, uid: &str) -> Vec<ConflictRecord> {
        self.inner.lock().unwrap().conflicts.iter()
            .filter(|conflict| conflict.uid == uid)
            .cloned()
            .collect()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().last_synced_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    pub fn photo(&self, photo_ref: &str) -> Option<String> {
        self.inner.lock().unwrap().photos.get(photo_ref).cloned()
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn contacts(&self) -> Result<Vec<Contact>, Box<dyn Error + Send + Sync>> {
        let inner = self.inner.lock().unwrap();
        let mut contacts: Vec<Contact> = inner.contacts.values()
            .filter(|contact| contact.is_deleted() == false)
            .cloned()
            .collect();
        contacts.sort_by_key(|contact| contact.id);
        Ok(contacts)
    }

    async fn contact(&self, id: ContactId) -> Result<Option<Contact>, Box<dyn Error + Send + Sync>> {
        Ok(self.inner.lock().unwrap().contacts.get(&id).cloned())
    }

    async fn create_contact(&mut self, uid: String, mut fields: ContactFields) -> Result<Contact, Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        inner.assign_child_ids(&mut fields);
        inner.next_contact_id += 1;
        let contact = Contact::new(inner.next_contact_id, uid, fields);
        inner.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn replace_contact_fields(&mut self, id: ContactId, mut fields: ContactFields) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        inner.assign_child_ids(&mut fields);
        match inner.contacts.get_mut(&id) {
            None => Err(format!("no contact {}", id).into()),
            Some(contact) => {
                contact.fields = fields;
                Ok(())
            }
        }
    }

    async fn mappings(&self) -> Result<Vec<Mapping>, Box<dyn Error + Send + Sync>> {
        let mut mappings: Vec<Mapping> = self.inner.lock().unwrap().mappings.values().cloned().collect();
        mappings.sort_by_key(|mapping| mapping.contact_id);
        Ok(mappings)
    }

    async fn mapping_by_uid(&self, uid: &str) -> Result<Option<Mapping>, Box<dyn Error + Send + Sync>> {
        Ok(self.inner.lock().unwrap().mappings.values()
            .find(|mapping| mapping.uid == uid)
            .cloned())
    }

    async fn mapping_for_contact(&self, contact_id: ContactId) -> Result<Option<Mapping>, Box<dyn Error + Send + Sync>> {
        Ok(self.inner.lock().unwrap().mappings.get(&contact_id).cloned())
    }

    async fn save_mapping(&mut self, mapping: Mapping) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.lock().unwrap().mappings.insert(mapping.contact_id, mapping);
        Ok(())
    }

    async fn pending_imports(&self) -> Result<Vec<PendingImport>, Box<dyn Error + Send + Sync>> {
        let mut pending: Vec<PendingImport> = self.inner.lock().unwrap().pending.values().cloned().collect();
        pending.sort_by(|left, right| left.uid.cmp(&right.uid));
        Ok(pending)
    }

    async fn save_pending_import(&mut self, pending: PendingImport) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.lock().unwrap().pending.insert(pending.uid.clone(), pending);
        Ok(())
    }

    async fn delete_pending_import(&mut self, uid: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.inner.lock().unwrap().pending.remove(uid);
        Ok(())
    }

    async fn save_conflict(&mut self, conflict: ConflictRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        // At most one open conflict per UID: a newer remote snapshot refreshes
        // the open record instead of piling up a second one
        match inner.conflicts.iter_mut().find(|existing| existing.uid == conflict.uid && existing.is_resolved() == false) {
            Some(existing) => *existing = conflict,
            None => inner.conflicts.push(conflict),
        }
        Ok(())
    }

    async fn unresolved_conflict(&self, uid: &str) -> Result<Option<ConflictRecord>, Box<dyn Error + Send + Sync>> {
        Ok(self.inner.lock().unwrap().conflicts.iter()
            .find(|conflict| conflict.uid == uid && conflict.is_resolved() == false)
            .cloned())
    }

    async fn mark_conflict_resolved(&mut self, uid: &str, choice: ConflictChoice) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        for conflict in inner.conflicts.iter_mut() {
            if conflict.uid == uid && conflict.is_resolved() == false {
                conflict.resolved_at = Some(Utc::now());
                conflict.resolution = Some(choice);
            }
        }
        Ok(())
    }

    async fn record_sync_success(&mut self, at: DateTime<Utc>) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_synced_at = Some(at);
        inner.last_error = None;
        inner.last_error_at = None;
        Ok(())
    }

    async fn record_sync_error(&mut self, message: &str, at: DateTime<Utc>) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error = Some(message.to_string());
        inner.last_error_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn read_photo_as_data_uri(&self, photo_ref: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        Ok(self.inner.lock().unwrap().photos.get(photo_ref).cloned())
    }

    async fn store_photo(&mut self, data_uri: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut inner = self.inner.lock().unwrap();
        // Same content, same reference. Re-importing an unchanged photo must
        // not make the contact look different
        let existing = inner.photos.iter()
            .find(|(_, stored)| stored.as_str() == data_uri)
            .map(|(reference, _)| reference.clone());
        if let Some(reference) = existing {
            return Ok(reference);
        }

        inner.next_photo_id += 1;
        let reference = format!("photo-{}", inner.next_photo_id);
        inner.photos.insert(reference.clone(), data_uri.to_string());
        Ok(reference)
    }
}
