//! End-to-end sync scenarios against an in-memory store and a mock server


use nametag_sync::mapping::{ConflictChoice, SyncStatus};
use nametag_sync::sync::sync_progress::{feedback_channel, SyncEvent};
use nametag_sync::sync::{ConflictResolution, SyncSummary};
use nametag_sync::traits::ContactStore;

use scenarii::*;

#[tokio::test]
async fn test_a_synced_pair_is_left_alone() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    // Any PUT would fail: this proves an unchanged pair costs no write at all
    {
        let mut behaviour = rig.behaviour.lock().unwrap();
        behaviour.create_vcard_behaviour = (0, 100);
        behaviour.update_vcard_behaviour = (0, 100);
    }

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert!(rig.store.last_synced_at().is_some());
}

#[tokio::test]
async fn test_a_remote_edit_updates_the_local_contact() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    // Another device renames her on the server
    let new_etag = rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Anaïs", "García", "+34 600 111 222"));

    let summary = rig.engine.sync_from_server().await.unwrap();
    assert_eq!(summary.updated_locally, 1);
    assert_eq!(summary.conflicts, 0);

    let updated = rig.store.find_contact_by_uid("uid-ana").unwrap();
    assert_eq!(updated.id, contact.id);
    assert_eq!(updated.fields.first_name.as_deref(), Some("Anaïs"));

    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert_eq!(mapping.etag, Some(new_etag));

    // Pulling again finds nothing to do
    let summary = rig.engine.sync_from_server().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
}

#[tokio::test]
async fn test_concurrent_edits_become_one_conflict() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    edit_locally(&mut rig, contact.id, simple_fields("Ana María", "García", "+34 600 111 222")).await;
    let remote_etag = rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Ana", "García", "+34 600 999 999"));

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.updated_locally, 0);
    assert_eq!(summary.updated_remotely, 0);

    // Neither side was touched
    let local = rig.store.find_contact_by_uid("uid-ana").unwrap();
    assert_eq!(local.fields.first_name.as_deref(), Some("Ana María"));
    assert_eq!(rig.book.card_etag(&url), Some(remote_etag.clone()));

    // The mapping adopted the remote ETag along with the conflict state
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Conflict);
    assert_eq!(mapping.etag, Some(remote_etag.clone()));

    let conflicts = rig.store.conflicts_for("uid-ana");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].remote_etag, Some(remote_etag));
    assert_eq!(conflicts[0].local_snapshot["first_name"], "Ana María");
    assert_eq!(conflicts[0].remote_snapshot["phones"][0]["number"], "+34 600 999 999");

    // The same server state must not spawn the conflict again
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.conflicts, 0);
    assert_eq!(rig.store.conflict_count(), 1);
}

#[tokio::test]
async fn test_discovery_records_each_unknown_vcard_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    rig.book.put_card("maria.vcf", &simple_vcard("uid-maria", "María", "Luz", "+34 600 000 001"));
    let (joao_url, _) = rig.book.put_card("joao.vcf", &simple_vcard("uid-joao", "João", "Silva", "+351 910 000 002"));

    let summary = rig.engine.discover().await.unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(rig.store.pending_imports().await.unwrap().len(), 2);
    // Discovery never touches the contact table on its own
    assert_eq!(rig.store.contact_count(), 0);

    let summary = rig.engine.discover().await.unwrap();
    assert_eq!(summary.imported, 0);
    assert_eq!(rig.store.pending_imports().await.unwrap().len(), 2);

    // A vCard deleted on the server takes its pending import with it
    assert!(rig.book.remove_card(&joao_url));
    let summary = rig.engine.discover().await.unwrap();
    assert_eq!(summary.imported, 0);
    let pending = rig.store.pending_imports().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].uid, "uid-maria");
}

#[tokio::test]
async fn test_importing_a_pending_import_materializes_the_contact() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (url, etag) = rig.book.put_card("maria.vcf", &simple_vcard("uid-maria", "María", "Luz", "+34 600 000 001"));
    rig.engine.discover().await.unwrap();

    let contact = rig.engine.import_pending("uid-maria").await.unwrap();
    assert_eq!(contact.fields.first_name.as_deref(), Some("María"));
    assert_eq!(contact.fields.phones[0].number, "+34 600 000 001");
    assert_eq!(rig.store.pending_imports().await.unwrap().len(), 0);

    let mapping = rig.store.mapping_by_uid("uid-maria").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert_eq!(mapping.href, Some(url));
    assert_eq!(mapping.etag, Some(etag));

    // Importing it a second time must fail, a full sync has nothing to add
    assert!(rig.engine.import_pending("uid-maria").await.is_err());
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(rig.store.contact_count(), 1);
}

#[tokio::test]
async fn test_a_local_edit_is_pushed_with_the_known_etag() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, old_etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    edit_locally(&mut rig, contact.id, simple_fields("Anaïs", "García", "+34 600 111 222")).await;

    let summary = rig.engine.sync_to_server().await.unwrap();
    assert_eq!(summary.updated_remotely, 1);
    assert_eq!(summary.errors, 0);
    assert!(rig.book.card_content(&url).unwrap().contains("Anaïs"));

    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert_ne!(mapping.etag, Some(old_etag));
    assert_eq!(mapping.etag, rig.book.card_etag(&url));
}

#[tokio::test]
async fn test_a_stale_push_is_skipped_not_errored() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    edit_locally(&mut rig, contact.id, simple_fields("Ana María", "García", "+34 600 111 222")).await;
    let remote_etag = rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Ana", "García", "+34 600 999 999"));

    // Push only: the If-Match precondition fails, and that is not an error
    let summary = rig.engine.sync_to_server().await.unwrap();
    assert_eq!(summary.updated_remotely, 0);
    assert_eq!(summary.errors, 0);
    assert_eq!(rig.book.card_etag(&url), Some(remote_etag.clone()));
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Pending);

    // The next full sync turns the situation into a conflict
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.conflicts, 1);
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.etag, Some(remote_etag));
}

#[tokio::test]
async fn test_a_new_local_contact_is_exported() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let contact = local_contact(&mut rig, "uid-rui", simple_fields("Rui", "Costa", "+351 910 000 003")).await;

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.exported, 1);
    assert_eq!(rig.book.card_count(), 1);

    let mapping = rig.store.mapping_for_contact(contact.id).await.unwrap().unwrap();
    assert_eq!(mapping.uid, "uid-rui");
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert!(mapping.etag.is_some());
    let url = mapping.href.clone().unwrap();
    assert!(rig.book.card_content(&url).unwrap().contains("UID:uid-rui"));

    // The exported card must not come back as a pending import
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(rig.store.pending_imports().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_a_stamped_but_unchanged_contact_skips_the_network() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, _url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    // Saved without actually changing anything (applications do that)
    edit_locally(&mut rig, contact.id, simple_fields("Ana", "García", "+34 600 111 222")).await;

    {
        let mut behaviour = rig.behaviour.lock().unwrap();
        behaviour.create_vcard_behaviour = (0, 100);
        behaviour.update_vcard_behaviour = (0, 100);
    }

    let summary = rig.engine.sync_to_server().await.unwrap();
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.updated_remotely, 0);
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_servers_that_rewrite_creations_are_reconciled() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    rig.book = rig.book.clone().rewriting_creates();
    let contact = local_contact(&mut rig, "uid-rui", simple_fields("Rui", "Costa", "+351 910 000 003")).await;

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.exported, 1);
    assert_eq!(rig.book.card_count(), 1);

    // The mapping adopted the server-chosen identity, not the one we sent
    let mapping = rig.store.mapping_for_contact(contact.id).await.unwrap().unwrap();
    assert_ne!(mapping.uid, "uid-rui");
    let actual_url = rig.book.card_urls().pop().unwrap();
    assert_eq!(mapping.href, Some(actual_url.clone()));
    assert_eq!(mapping.etag, rig.book.card_etag(&actual_url));

    // No duplicate exports, no phantom pending import of our own card
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(rig.book.card_count(), 1);
    assert_eq!(rig.store.pending_imports().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_auto_export_only_runs_when_opted_in() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let contact = local_contact(&mut rig, "uid-rui", simple_fields("Rui", "Costa", "+351 910 000 003")).await;
    rig.engine.export_new_contact(contact.id).await.unwrap();
    assert_eq!(rig.book.card_count(), 0);

    let mut rig = rig_with(|connection| connection.auto_export = true);
    let contact = local_contact(&mut rig, "uid-rui", simple_fields("Rui", "Costa", "+351 910 000 003")).await;
    rig.engine.export_new_contact(contact.id).await.unwrap();
    assert_eq!(rig.book.card_count(), 1);
    let mapping = rig.store.mapping_for_contact(contact.id).await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert!(mapping.etag.is_some());
}

#[tokio::test]
async fn test_a_contact_deleted_during_its_export_is_rolled_back() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig_with(|connection| connection.auto_export = true);
    let contact = local_contact(&mut rig, "uid-rui", simple_fields("Rui", "Costa", "+351 910 000 003")).await;

    // The user deletes the contact while its PUT is in flight
    let store = rig.store.clone();
    let contact_id = contact.id;
    rig.book.on_create(Box::new(move || store.soft_delete_contact(contact_id)));

    rig.engine.export_new_contact(contact.id).await.unwrap();
    assert_eq!(rig.book.card_count(), 0);
    assert!(rig.store.mapping_for_contact(contact.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_contact_updated_pushes_immediately_when_sync_is_enabled() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    rig.store.clone().replace_contact_fields(contact.id, simple_fields("Anaïs", "García", "+34 600 111 222")).await.unwrap();
    rig.engine.contact_updated(contact.id).await.unwrap();

    assert!(rig.book.card_content(&url).unwrap().contains("Anaïs"));
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_contact_updated_only_stamps_when_sync_is_disabled() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig_with(|connection| connection.sync_enabled = false);
    let (contact, url, old_etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    rig.store.clone().replace_contact_fields(contact.id, simple_fields("Anaïs", "García", "+34 600 111 222")).await.unwrap();
    rig.engine.contact_updated(contact.id).await.unwrap();

    // Stamped for a later sync, but nothing reached the server
    assert_eq!(rig.book.card_etag(&url), Some(old_etag));
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Pending);
}

#[tokio::test]
async fn test_a_connection_failure_persists_a_categorized_message() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    rig.behaviour.lock().unwrap().discover_address_books_behaviour = (0, 1);

    assert!(rig.engine.sync().await.is_err());
    assert_eq!(rig.store.last_synced_at(), None);
    // The stored message is the categorized one, not the raw error
    assert_eq!(rig.store.last_error(),
               Some("Synchronization failed due to an unexpected error.".to_string()));

    // The next run succeeds and clears the error
    let summary = rig.engine.sync().await.unwrap();
    assert!(summary.is_success());
    assert_eq!(rig.store.last_error(), None);
    assert!(rig.store.last_synced_at().is_some());
}

#[tokio::test]
async fn test_a_vcard_without_uid_is_counted_but_not_fatal() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    rig.book.put_card("broken.vcf", "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Mystery Caller\r\nEND:VCARD\r\n");
    rig.book.put_card("maria.vcf", &simple_vcard("uid-maria", "María", "Luz", "+34 600 000 001"));

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.imported, 1);
    assert!(summary.is_success() == false);
    // The run still succeeded as a whole
    assert!(rig.store.last_synced_at().is_some());
}

#[tokio::test]
async fn test_resolving_a_conflict_with_the_remote_side() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;
    edit_locally(&mut rig, contact.id, simple_fields("Ana María", "García", "+34 600 111 222")).await;
    rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Ana", "García", "+34 600 999 999"));
    rig.engine.sync().await.unwrap();

    rig.engine.resolve_conflict("uid-ana", ConflictResolution::KeepRemote).await.unwrap();

    let local = rig.store.find_contact_by_uid("uid-ana").unwrap();
    assert_eq!(local.fields.first_name.as_deref(), Some("Ana"));
    assert_eq!(local.fields.phones[0].number, "+34 600 999 999");
    assert!(rig.store.unresolved_conflict("uid-ana").await.unwrap().is_none());

    // The record keeps what was decided
    let conflicts = rig.store.conflicts_for("uid-ana");
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].is_resolved());
    assert_eq!(conflicts[0].resolution, Some(ConflictChoice::KeepRemote));

    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);

    // Both sides agree again, nothing left to do
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary, SyncSummary::default());
}

#[tokio::test]
async fn test_resolving_a_conflict_with_the_local_side() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;
    edit_locally(&mut rig, contact.id, simple_fields("Ana María", "García", "+34 600 111 222")).await;
    rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Ana", "García", "+34 600 999 999"));
    rig.engine.sync().await.unwrap();

    rig.engine.resolve_conflict("uid-ana", ConflictResolution::KeepLocal).await.unwrap();
    assert!(rig.store.unresolved_conflict("uid-ana").await.unwrap().is_none());
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Pending);

    // The adopted ETag lets the push go through; the local edit wins
    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.updated_remotely, 1);
    assert_eq!(summary.conflicts, 0);
    assert!(rig.book.card_content(&url).unwrap().contains("Ana María"));
    let mapping = rig.store.mapping_by_uid("uid-ana").await.unwrap().unwrap();
    assert_eq!(mapping.status, SyncStatus::Synced);
    assert_eq!(mapping.etag, rig.book.card_etag(&url));
}

#[tokio::test]
async fn test_resolving_a_conflict_with_a_merged_payload() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    let (contact, url, _etag) = synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;
    edit_locally(&mut rig, contact.id, simple_fields("Ana María", "García", "+34 600 111 222")).await;
    rig.book.overwrite_card(&url, &simple_vcard("uid-ana", "Ana", "García", "+34 600 999 999"));
    rig.engine.sync().await.unwrap();

    // The user keeps the local name and the remote phone number
    let merged = simple_fields("Ana María", "García", "+34 600 999 999");
    rig.engine.resolve_conflict("uid-ana", ConflictResolution::Merged(merged)).await.unwrap();

    let local = rig.store.find_contact_by_uid("uid-ana").unwrap();
    assert_eq!(local.fields.first_name.as_deref(), Some("Ana María"));
    assert_eq!(local.fields.phones[0].number, "+34 600 999 999");

    let summary = rig.engine.sync().await.unwrap();
    assert_eq!(summary.updated_remotely, 1);
    let content = rig.book.card_content(&url).unwrap();
    assert!(content.contains("Ana María"));
    assert!(content.contains("+34 600 999 999"));
}

#[tokio::test]
async fn test_feedback_reports_the_completion() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rig = rig();
    synced_contact(&mut rig, "uid-ana", simple_fields("Ana", "García", "+34 600 111 222")).await;

    let (sender, receiver) = feedback_channel();
    rig.engine.sync_with_feedback(sender).await.unwrap();

    // a statement, so the borrow on the channel ends before `receiver` drops
    match &*receiver.borrow() {
        SyncEvent::Finished { success } => assert!(*success),
        other => panic!("expected a Finished event, got {}", other),
    };
}
