//! The discovery pass: spotting server-side contacts that are not known
//! locally yet, and garbage-collecting stale pending imports

use std::collections::HashSet;
use std::error::Error;

use chrono::Utc;

use crate::contact::Contact;
use crate::hash::content_hash;
use crate::mapping::{Mapping, PendingImport, SyncStatus};
use crate::traits::{CardDavSource, ContactStore, PhotoStore};
use crate::vcard;

use super::sync_progress::{SyncEvent, SyncPhase, SyncProgress};
use super::{RemoteEntry, SyncEngine, SyncSummary};

impl<S, P, R> SyncEngine<S, P, R>
where
    S: ContactStore + Send + Sync,
    P: PhotoStore + Send + Sync,
    R: CardDavSource + Send + Sync,
{
    /// Record every unknown remote vCard as a pending import, then drop the
    /// pending imports whose server resource is gone.
    ///
    /// Nothing is written to the contact table here. Turning a pending import
    /// into a real contact is the application's call (someone may recognize a
    /// coworker's address book pushed by mistake), made through
    /// [`Self::import_pending`].
    pub(super) async fn discovery_pass(&mut self, entries: &[RemoteEntry], progress: &mut SyncProgress, summary: &mut SyncSummary) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mapped_uids: HashSet<String> = self.store.mappings().await?
            .into_iter()
            .map(|mapping| mapping.uid)
            .collect();
        let pending = self.store.pending_imports().await?;
        let pending_uids: HashSet<&str> = pending.iter().map(|import| import.uid.as_str()).collect();

        let total = entries.len();
        for (n, entry) in entries.iter().enumerate() {
            progress.feedback(SyncEvent::InProgress {
                phase: SyncPhase::Discover,
                current: n + 1,
                total,
                contact: entry.parsed.display_name(),
            });
            if mapped_uids.contains(&entry.uid) || pending_uids.contains(entry.uid.as_str()) {
                continue;
            }
            let import = PendingImport {
                uid: entry.uid.clone(),
                display_name: entry.parsed.display_name(),
                href: entry.card.url.clone(),
                etag: Some(entry.card.etag.clone()),
                data: entry.card.data.clone(),
                discovered_at: Utc::now(),
            };
            match self.store.save_pending_import(import).await {
                Ok(()) => {
                    log::debug!("Discovered {} ({}) on the server", entry.parsed.display_name(), entry.uid);
                    summary.imported += 1;
                }
                Err(err) => {
                    progress.error(&format!("Unable to record the pending import of {}: {}", entry.uid, err));
                    summary.errors += 1;
                }
            }
        }

        // A pending import whose vCard left the server (and that no mapping
        // claimed in the meantime) has nothing left to offer
        let server_uids: HashSet<&str> = entries.iter().map(|entry| entry.uid.as_str()).collect();
        for import in pending {
            if server_uids.contains(import.uid.as_str()) || mapped_uids.contains(&import.uid) {
                continue;
            }
            match self.store.delete_pending_import(&import.uid).await {
                Ok(()) => log::debug!("Dropped the pending import of {}: it is no longer on the server", import.uid),
                Err(err) => {
                    progress.error(&format!("Unable to drop the stale pending import of {}: {}", import.uid, err));
                    summary.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Materialize a pending import into a full local contact.
    ///
    /// The stored vCard snapshot is decoded, its photo (if any) is handed to
    /// the photo store, and the new contact starts its life already synced.
    pub async fn import_pending(&mut self, uid: &str) -> Result<Contact, Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.acquire().await;

        let pending = self.store.pending_imports().await?
            .into_iter()
            .find(|import| import.uid == uid)
            .ok_or_else(|| format!("No pending import for UID {}", uid))?;
        if self.store.mapping_by_uid(&pending.uid).await?.is_some() {
            return Err(format!("UID {} is already mapped to a local contact", pending.uid).into());
        }

        let parsed = vcard::parse(&pending.data);
        let remote_version = content_hash(&parsed.fields);
        let uid = parsed.uid.unwrap_or_else(|| pending.uid.clone());
        let mut fields = parsed.fields;
        self.intern_photo(&mut fields).await?;
        let local_version = content_hash(&fields);

        let contact = self.store.create_contact(uid.clone(), fields).await?;
        let mapping = Mapping {
            contact_id: contact.id,
            uid,
            href: Some(pending.href.clone()),
            etag: pending.etag.clone(),
            status: SyncStatus::Synced,
            last_local_change: None,
            last_synced_at: Some(Utc::now()),
            last_remote_change: Some(pending.discovered_at),
            local_version: Some(local_version),
            remote_version: Some(remote_version),
        };
        self.store.save_mapping(mapping).await?;
        self.store.delete_pending_import(&pending.uid).await?;
        log::info!("Imported {} as contact {}", pending.display_name, contact.id);
        Ok(contact)
    }
}
