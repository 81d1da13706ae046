//! Event-driven hooks, to be called by the embedding application when a
//! contact is created or edited locally.
//!
//! These are best-effort accelerators: whatever they miss (the connection was
//! offline, a hook errored out), the stamped mappings guarantee the next full
//! sync catches up.

use std::error::Error;

use chrono::Utc;

use crate::contact::ContactId;
use crate::hash::content_hash;
use crate::mapping::{Mapping, SyncStatus};
use crate::traits::{CardDavSource, ContactStore, DavAddressBook, PhotoStore};
use crate::vcard;

use super::{effective_uid, vcard_filename, SyncEngine, SyncSummary};

impl<S, P, R> SyncEngine<S, P, R>
where
    S: ContactStore + Send + Sync,
    P: PhotoStore + Send + Sync,
    R: CardDavSource + Send + Sync,
{
    /// Export a freshly created contact right away, without waiting for the
    /// next scheduled sync. Does nothing unless the connection opted in with
    /// its auto-export flag, or when the contact is already mapped.
    ///
    /// The contact can be deleted while its PUT is in flight. In that case the
    /// just-created server resource is deleted again and no mapping is
    /// written, as if the export had never happened.
    pub async fn export_new_contact(&mut self, contact_id: ContactId) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.connection.auto_export == false {
            return Ok(());
        }
        let _guard = self.lock.acquire().await;

        if self.store.mapping_for_contact(contact_id).await?.is_some() {
            return Ok(());
        }
        let contact = match self.store.contact(contact_id).await? {
            Some(contact) => contact,
            None => return Ok(()),
        };
        if contact.is_deleted() {
            return Ok(());
        }

        let book = self.first_address_book().await?;
        let uid = effective_uid(&contact);
        let hash = content_hash(&contact.fields);
        let photo = self.resolve_photo(&contact.fields).await;
        let content = vcard::build(&uid, &contact.fields, book.supported_versions().preferred(), photo.as_deref());

        let filename = vcard_filename(&uid);
        let outcome = book.create_vcard(&filename, &content).await?;

        // The PUT took time; the user may have deleted the contact meanwhile
        let still_there = self.store.contact(contact_id).await?
            .map(|contact| contact.is_deleted() == false)
            .unwrap_or(false);
        if still_there == false {
            log::info!("Contact {} was deleted during its export, removing it from the server again", contact_id);
            book.delete_vcard(&outcome.url).await?;
            return Ok(());
        }

        let created = self.adopt_put_outcome(&book, &filename, outcome, &contact.fields).await;
        let mapping = Mapping {
            contact_id,
            uid: created.server_uid.unwrap_or(uid),
            href: Some(created.url),
            etag: created.etag,
            status: SyncStatus::Synced,
            last_local_change: None,
            last_synced_at: Some(Utc::now()),
            last_remote_change: None,
            local_version: Some(hash.clone()),
            remote_version: Some(hash),
        };
        self.store.save_mapping(mapping).await?;
        log::info!("Auto-exported contact {}", contact_id);
        Ok(())
    }

    /// Note that a contact changed locally, and push it right away when the
    /// connection has sync enabled.
    ///
    /// The stamp is persisted before any network activity, so a failed push
    /// here only postpones the change to the next sync. Conflicted mappings
    /// are stamped but never pushed: the conflict has to be settled first.
    pub async fn contact_updated(&mut self, contact_id: ContactId) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.acquire().await;

        let contact = match self.store.contact(contact_id).await? {
            Some(contact) => contact,
            None => return Ok(()),
        };
        if contact.is_deleted() {
            return Ok(());
        }

        let mut mapping = match self.store.mapping_for_contact(contact_id).await? {
            Some(mapping) => mapping,
            None => Mapping::new_pending(contact_id, effective_uid(&contact)),
        };
        mapping.last_local_change = Some(Utc::now());
        if mapping.status != SyncStatus::Conflict {
            mapping.status = SyncStatus::Pending;
        }
        self.store.save_mapping(mapping.clone()).await?;

        if self.connection.sync_enabled == false || mapping.status == SyncStatus::Conflict {
            return Ok(());
        }

        let book = self.first_address_book().await?;
        let mut summary = SyncSummary::default();
        self.push_mapped(&book, mapping, &contact, &mut summary).await?;
        Ok(())
    }
}
