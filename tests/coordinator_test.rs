//! End-to-end tests for the generation pipeline against in-memory stores.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cardsmith::{
    CacheStatus, CacheStore, CardsmithError, CheckOutcome, ContentType, CoordinatorSettings, Deck, DocumentStatus,
    DocumentStore, GENERIC_FAILURE_MESSAGE, IdentityKey, JobHandler, MemoryStore, Owner,
    ReconcileOutcome,
};
use common::{FlakyStore, Harness, LECTURE, MockClient, request, types};
use tokio::sync::Notify;

use ContentType::{Exercise, Flashcard, Quiz};

fn user() -> Owner {
    Owner::User("user-42".into())
}

fn guest() -> Owner {
    Owner::Guest("guest-session-7".into())
}

fn lecture_key() -> IdentityKey {
    IdentityKey::for_file(LECTURE, "en", cardsmith::Difficulty::Medium)
}

// ============================================================================
// Incremental backfill
// ============================================================================

#[tokio::test]
async fn later_request_for_more_types_backfills_only_missing() {
    let mut h = Harness::new(MockClient::new());

    let first = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    assert!(first.is_processing());
    let document_id = first.document_id().expect("document created");

    assert_eq!(h.run_due_jobs().await, 1);
    assert_eq!(h.client.calls(), vec![types(&[Flashcard])]);

    let both = request(LECTURE, &[Flashcard, Quiz]);
    let second = h.coordinator.check_or_process(&both, &user()).await.unwrap();
    match &second {
        CheckOutcome::Done {
            document_id: id,
            payload,
            pending_types,
        } => {
            assert_eq!(*id, Some(document_id));
            assert_eq!(payload.flashcard.len(), 1);
            assert!(payload.quiz.is_empty());
            assert_eq!(*pending_types, types(&[Quiz]));
        }
        other => panic!("expected done with pending quiz, got {other:?}"),
    }

    assert_eq!(h.run_due_jobs().await, 1);
    assert_eq!(
        h.client.calls(),
        vec![types(&[Flashcard]), types(&[Quiz])],
        "only quiz was sent for the backfill"
    );

    let third = h.coordinator.check_or_process(&both, &user()).await.unwrap();
    match third {
        CheckOutcome::Done {
            payload,
            pending_types,
            ..
        } => {
            assert_eq!(payload.flashcard.len(), 1);
            assert_eq!(payload.quiz.len(), 1);
            assert!(pending_types.is_empty());
        }
        other => panic!("expected done, got {other:?}"),
    }
    assert_eq!(h.client.call_count(), 2);

    let record = h.store.get_record(&lecture_key()).await.unwrap().unwrap();
    let cached = record.result_payload.unwrap();
    assert_eq!(cached.content_types(), types(&[Flashcard, Quiz]));
}

#[tokio::test]
async fn done_payload_contains_only_requested_types() {
    let mut h = Harness::new(MockClient::new());
    h.coordinator
        .check_or_process(&request(LECTURE, &[Flashcard, Quiz, Exercise]), &user())
        .await
        .unwrap();
    h.run_due_jobs().await;

    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Quiz]), &user())
        .await
        .unwrap();
    let payload = outcome.payload().expect("done");
    assert_eq!(payload.content_types(), types(&[Quiz]));
    assert_eq!(h.client.call_count(), 1);
}

// ============================================================================
// Concurrent identical uploads
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_identical_uploads_generate_once() {
    let mut h = Harness::new(MockClient::new());
    let req = request(LECTURE, &[Flashcard, Quiz]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let req = req.clone();
            tokio::spawn(async move { coordinator.check_or_process(&req, &user()).await })
        })
        .collect();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_processing());
    }
    assert_eq!(h.store.document_count(), 1);

    h.run_due_jobs().await;
    assert_eq!(h.client.call_count(), 1);

    let a = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let b = h.coordinator.check_or_process(&req, &guest()).await.unwrap();
    assert!(a.is_done() && b.is_done());
    assert_eq!(a.payload(), b.payload());
    assert_eq!(h.client.call_count(), 1);
}

// ============================================================================
// Failure, cleanup and recovery
// ============================================================================

#[tokio::test]
async fn failed_generation_is_cleaned_up_and_retryable() {
    let mut h = Harness::new(MockClient::failing());
    let req = request(LECTURE, &[Flashcard]);

    let outcome = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    let document = h.store.find_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Failed);
    assert!(
        document
            .metadata
            .error_message
            .as_deref()
            .unwrap()
            .contains("upstream model unavailable")
    );

    let status = h.coordinator.document_status(document_id, None).await.unwrap();
    match status {
        CheckOutcome::Failed { message, .. } => {
            assert!(message.contains("upstream model unavailable"));
        }
        other => panic!("expected failed, got {other:?}"),
    }

    assert_eq!(h.store.document_count(), 0);
    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.store.item_count(), 0);
    assert!(h.files.is_empty());

    h.client.set_failing(false);
    let retry = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let retry_id = retry.document_id().unwrap();
    assert_ne!(retry_id, document_id);
    h.run_due_jobs().await;

    let done = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert_eq!(done.payload().unwrap().flashcard.len(), 1);
    assert_eq!(h.client.call_count(), 2);
}

#[tokio::test]
async fn guests_see_generic_failure_message() {
    let mut h = Harness::new(MockClient::failing());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &guest())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    assert!(h.store.find_guest_upload(document_id).await.unwrap().is_some());
    h.run_due_jobs().await;

    let stored = h.store.find_document(document_id).await.unwrap().unwrap();
    assert_eq!(
        stored.metadata.error_message.as_deref(),
        Some(GENERIC_FAILURE_MESSAGE)
    );

    match h.coordinator.document_status(document_id, None).await.unwrap() {
        CheckOutcome::Failed { message, .. } => assert_eq!(message, GENERIC_FAILURE_MESSAGE),
        other => panic!("expected failed, got {other:?}"),
    }
    assert_eq!(h.store.guest_upload_count(), 0);
}

#[tokio::test]
async fn failed_record_is_not_served_as_a_hit() {
    let mut h = Harness::new(MockClient::failing());
    let req = request(LECTURE, &[Flashcard]);
    let first = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    h.run_due_jobs().await;

    let record = h.store.get_record(&lecture_key()).await.unwrap().unwrap();
    assert_eq!(record.status, CacheStatus::Failed);

    // No status poll in between: the next request replaces the failed record.
    let second = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(second.is_processing());
    assert_ne!(second.document_id(), first.document_id());

    let record = h.store.get_record(&lecture_key()).await.unwrap().unwrap();
    assert_eq!(record.status, CacheStatus::Processing);
    assert_eq!(record.linked_document_id, second.document_id());
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn repeated_reconciliation_makes_no_extra_calls() {
    let mut h = Harness::new(MockClient::new());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    let wanted = types(&[Flashcard, Exercise]);
    let first = h
        .coordinator
        .reconcile_missing_types(document_id, &wanted)
        .await
        .unwrap();
    assert_eq!(first, ReconcileOutcome::Scheduled(types(&[Exercise])));
    h.run_due_jobs().await;
    let calls = h.client.call_count();

    let second = h
        .coordinator
        .reconcile_missing_types(document_id, &wanted)
        .await
        .unwrap();
    assert_eq!(second, ReconcileOutcome::NothingMissing);
    assert_eq!(h.run_due_jobs().await, 0);
    assert_eq!(h.client.call_count(), calls);
}

#[tokio::test]
async fn duplicate_backfill_skips_the_service() {
    let mut h = Harness::new(MockClient::new());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    h.coordinator
        .run_backfill(document_id, &types(&[Quiz]))
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 2);

    // A second backfill for the same type finds it present at run time.
    h.coordinator
        .run_backfill(document_id, &types(&[Quiz]))
        .await
        .unwrap();
    assert_eq!(h.client.call_count(), 2);
    let items = h.store.content_items(document_id).await.unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn backfill_failure_keeps_document_completed() {
    let mut h = Harness::new(MockClient::new());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    h.client.set_failing(true);
    h.coordinator
        .reconcile_missing_types(document_id, &types(&[Flashcard, Quiz]))
        .await
        .unwrap();
    h.run_due_jobs().await;

    let document = h.store.find_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);
    assert!(document.metadata.backfill_error.is_some());
    assert!(document.metadata.pending_types.is_empty());

    let status = h
        .coordinator
        .document_status(document_id, Some(&types(&[Flashcard, Quiz])))
        .await
        .unwrap();
    assert_eq!(status.payload().unwrap().flashcard.len(), 1);
}

#[tokio::test]
async fn types_requested_during_generation_are_backfilled_after() {
    let mut h = Harness::new(MockClient::new());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();

    // Still processing: the types join the pending initial generation.
    let reconciled = h
        .coordinator
        .reconcile_missing_types(document_id, &types(&[Flashcard, Quiz]))
        .await
        .unwrap();
    assert_eq!(
        reconciled,
        ReconcileOutcome::Scheduled(types(&[Flashcard, Quiz]))
    );

    assert_eq!(h.run_due_jobs().await, 1);
    assert_eq!(h.client.calls(), vec![types(&[Flashcard, Quiz])]);
    let status = h
        .coordinator
        .document_status(document_id, None)
        .await
        .unwrap();
    assert_eq!(
        status.payload().unwrap().content_types(),
        types(&[Flashcard, Quiz])
    );
}

#[tokio::test]
async fn second_upload_during_generation_adds_its_types() {
    let mut h = Harness::new(MockClient::new());
    let first = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = first.document_id().unwrap();

    let second = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard, Quiz]), &user())
        .await
        .unwrap();
    assert!(second.is_processing());
    assert_eq!(second.document_id(), Some(document_id));

    assert_eq!(h.run_due_jobs().await, 1);
    assert_eq!(h.client.calls(), vec![types(&[Flashcard, Quiz])]);
    let status = h
        .coordinator
        .document_status(document_id, Some(&types(&[Flashcard, Quiz])))
        .await
        .unwrap();
    assert_eq!(
        status.payload().unwrap().content_types(),
        types(&[Flashcard, Quiz])
    );
}

#[tokio::test]
async fn upload_during_service_call_is_backfilled_after() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(MockClient::gated(gate.clone()));
    let first = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = first.document_id().unwrap();

    let job = h.receiver.try_recv().expect("generation job due");
    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.handle(job).await });
    h.client.entered.notified().await;

    let second = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard, Quiz]), &user())
        .await
        .unwrap();
    assert_eq!(second.document_id(), Some(document_id));

    gate.notify_one();
    running.await.unwrap().unwrap();

    // The call already in flight asked for flashcards only.
    gate.notify_one();
    assert_eq!(h.run_due_jobs().await, 1);
    assert_eq!(
        h.client.calls(),
        vec![types(&[Flashcard]), types(&[Quiz])]
    );
    let status = h
        .coordinator
        .document_status(document_id, None)
        .await
        .unwrap();
    assert_eq!(
        status.payload().unwrap().content_types(),
        types(&[Flashcard, Quiz])
    );
}

#[tokio::test]
async fn reconcile_rejects_unknown_and_failed_documents() {
    let mut h = Harness::new(MockClient::failing());
    let unknown = cardsmith::DocumentId::new();
    assert!(matches!(
        h.coordinator
            .reconcile_missing_types(unknown, &types(&[Quiz]))
            .await,
        Err(cardsmith::CardsmithError::NotFound(_))
    ));

    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    h.run_due_jobs().await;
    assert!(matches!(
        h.coordinator
            .reconcile_missing_types(outcome.document_id().unwrap(), &types(&[Quiz]))
            .await,
        Err(cardsmith::CardsmithError::InvalidState(_))
    ));
}

// ============================================================================
// Cleanup atomicity
// ============================================================================

#[tokio::test]
async fn interrupted_cleanup_leaves_rows_and_converges_on_retry() {
    let store = Arc::new(FlakyStore::default());
    let settings = CoordinatorSettings::new().initial_delay(Duration::ZERO);
    let mut h = Harness::with_store(MockClient::failing(), store.clone(), settings);

    let deck = Deck::new(guest(), "Biology");
    let deck_id = deck.id;
    store.create_deck(deck).await.unwrap();

    let req = request(LECTURE, &[Flashcard]).deck(deck_id);
    let outcome = h.coordinator.check_or_process(&req, &guest()).await.unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    store.fail_next_commit();
    assert!(
        h.coordinator
            .cleanup_failed_document(document_id)
            .await
            .is_err()
    );
    assert!(store.find_document(document_id).await.unwrap().is_some());
    assert!(store.find_guest_upload(document_id).await.unwrap().is_some());
    assert!(store.get_record(&lecture_key()).await.unwrap().is_some());
    assert!(store.find_deck(deck_id).await.unwrap().is_some());

    assert!(h.coordinator.cleanup_failed_document(document_id).await.unwrap());
    assert!(store.find_document_with_deleted(document_id).await.unwrap().is_none());
    assert!(store.find_guest_upload(document_id).await.unwrap().is_none());
    assert!(store.get_record(&lecture_key()).await.unwrap().is_none());
    assert!(store.find_deck(deck_id).await.unwrap().is_none());
    assert!(h.files.is_empty());

    // Idempotent.
    assert!(!h.coordinator.cleanup_failed_document(document_id).await.unwrap());
}

#[tokio::test]
async fn failed_document_insert_leaves_no_stored_file() {
    let store = Arc::new(FlakyStore::default());
    let settings = CoordinatorSettings::new().initial_delay(Duration::ZERO);
    let h = Harness::with_store(MockClient::new(), store.clone(), settings);
    let req = request(LECTURE, &[Flashcard]);

    store.fail_next_create();
    let err = h.coordinator.check_or_process(&req, &user()).await.unwrap_err();
    assert!(matches!(err, CardsmithError::Storage(_)));
    assert!(h.files.is_empty());
    assert_eq!(store.inner.document_count(), 0);
    let record = store.get_record(&lecture_key()).await.unwrap().unwrap();
    assert_eq!(record.status, CacheStatus::Failed);

    let again = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(again.is_processing());
    assert_eq!(store.inner.document_count(), 1);
    assert!(!h.files.is_empty());
}

#[tokio::test]
async fn cleanup_ignores_documents_that_did_not_fail() {
    let mut h = Harness::new(MockClient::new());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    assert!(!h.coordinator.cleanup_failed_document(document_id).await.unwrap());
    assert_eq!(h.store.document_count(), 1);
}

#[tokio::test]
async fn sweep_removes_every_failed_document() {
    let mut h = Harness::new(MockClient::failing());
    for bytes in [&b"%PDF first"[..], &b"%PDF second"[..]] {
        h.coordinator
            .check_or_process(&request(bytes, &[Flashcard]), &user())
            .await
            .unwrap();
    }
    h.run_due_jobs().await;

    assert_eq!(h.coordinator.sweep_failed_documents().await.unwrap(), 2);
    assert_eq!(h.store.document_count(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_before_run_skips_the_service() {
    let mut h = Harness::new(MockClient::new());
    let req = request(LECTURE, &[Flashcard]);
    let outcome = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let document_id = outcome.document_id().unwrap();

    h.coordinator.cancel(document_id).await.unwrap();
    h.coordinator.cancel(document_id).await.unwrap();
    h.run_due_jobs().await;

    assert_eq!(h.client.call_count(), 0);
    assert_eq!(
        h.coordinator.document_status(document_id, None).await.unwrap(),
        CheckOutcome::Cancelled { document_id }
    );

    // The reservation was released, so the file can be submitted again.
    let again = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(again.is_processing());
    assert_ne!(again.document_id(), Some(document_id));
}

#[tokio::test]
async fn cancelled_during_generation_discards_output() {
    let gate = Arc::new(Notify::new());
    let mut h = Harness::new(MockClient::gated(gate.clone()));
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();

    let job = h.receiver.try_recv().expect("generation job due");
    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.handle(job).await });

    h.client.entered.notified().await;
    h.coordinator.cancel(document_id).await.unwrap();
    gate.notify_one();
    running.await.unwrap().unwrap();

    assert_eq!(h.store.item_count(), 0);
    let document = h.store.find_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Cancelled);
    let record = h.store.get_record(&lecture_key()).await.unwrap().unwrap();
    assert_eq!(record.status, CacheStatus::Failed);
}

#[tokio::test]
async fn cancelled_during_failing_generation_releases_reservation() {
    let gate = Arc::new(Notify::new());
    let client = MockClient::gated(gate.clone());
    client.set_failing(true);
    let mut h = Harness::new(client);
    let req = request(LECTURE, &[Flashcard]);
    let outcome = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let document_id = outcome.document_id().unwrap();

    let job = h.receiver.try_recv().expect("generation job due");
    let coordinator = h.coordinator.clone();
    let running = tokio::spawn(async move { coordinator.handle(job).await });

    h.client.entered.notified().await;
    h.coordinator.cancel(document_id).await.unwrap();
    gate.notify_one();
    running.await.unwrap().unwrap();

    let document = h.store.find_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Cancelled);
    assert!(document.metadata.error_message.is_none());
    let record = h.store.get_record(&lecture_key()).await.unwrap().unwrap();
    assert_eq!(record.status, CacheStatus::Failed);

    let again = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(again.is_processing());
    assert_ne!(again.document_id(), Some(document_id));
}

#[tokio::test]
async fn cancelled_completed_document_is_regenerated_on_request() {
    let mut h = Harness::new(MockClient::new());
    let req = request(LECTURE, &[Flashcard]);
    let outcome = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    h.coordinator.cancel(document_id).await.unwrap();
    let again = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(again.is_processing());
    assert_ne!(again.document_id(), Some(document_id));
}

// ============================================================================
// Request path edges
// ============================================================================

#[tokio::test]
async fn invalid_requests_touch_nothing() {
    let h = Harness::new(MockClient::new());

    let mut bad = request(LECTURE, &[Flashcard]);
    bad.file.filename = "malware.exe".into();
    let err = h.coordinator.check_or_process(&bad, &user()).await.unwrap_err();
    assert!(err.is_validation());

    let mut bad = request(LECTURE, &[Flashcard]);
    bad.language = "tlh".into();
    let err = h.coordinator.check_or_process(&bad, &user()).await.unwrap_err();
    assert!(err.is_validation());

    let empty = request(LECTURE, &[]);
    assert!(h.coordinator.check_or_process(&empty, &user()).await.is_err());

    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.store.document_count(), 0);
    assert!(h.files.is_empty());
}

#[tokio::test]
async fn in_progress_requests_report_processing() {
    let h = Harness::new(MockClient::new());
    let req = request(LECTURE, &[Flashcard]);
    let first = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    let second = h.coordinator.check_or_process(&req, &user()).await.unwrap();
    assert!(second.is_processing());
    assert_eq!(second.document_id(), first.document_id());
    assert_eq!(h.store.document_count(), 1);
}

#[tokio::test]
async fn identity_ignores_filename() {
    let mut h = Harness::new(MockClient::new());
    h.coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();
    h.run_due_jobs().await;

    let mut renamed = request(LECTURE, &[Flashcard]);
    renamed.file.filename = "copy of lecture.PDF".into();
    let outcome = h.coordinator.check_or_process(&renamed, &user()).await.unwrap();
    assert!(outcome.is_done());
    assert_eq!(h.client.call_count(), 1);
}

#[tokio::test]
async fn empty_service_answer_fails_the_document() {
    let mut h = Harness::new(MockClient::empty());
    let outcome = h
        .coordinator
        .check_or_process(&request(LECTURE, &[Quiz]), &user())
        .await
        .unwrap();
    let document_id = outcome.document_id().unwrap();
    h.run_due_jobs().await;

    match h.coordinator.document_status(document_id, None).await.unwrap() {
        CheckOutcome::Failed { message, .. } => {
            assert!(message.contains("none of the requested types"));
        }
        other => panic!("expected failed, got {other:?}"),
    }
    assert_eq!(h.store.item_count(), 0);
}

#[tokio::test]
async fn unknown_document_status_is_not_found() {
    let h = Harness::new(MockClient::new());
    let result = h
        .coordinator
        .document_status(cardsmith::DocumentId::new(), None)
        .await;
    assert!(matches!(result, Err(cardsmith::CardsmithError::NotFound(_))));
}

#[tokio::test]
async fn uncached_generation_bypasses_cache() {
    let h = Harness::new(MockClient::new());
    let content = h
        .coordinator
        .generate_uncached(&request(LECTURE, &[Quiz, Exercise]))
        .await
        .unwrap();
    assert_eq!(content.content_types(), types(&[Quiz, Exercise]));
    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.store.document_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn uncached_generation_times_out() {
    let gate = Arc::new(Notify::new());
    let settings = CoordinatorSettings::new().generation_timeout(Duration::from_secs(5));
    let h = Harness::with_store(
        MockClient::gated(gate),
        Arc::new(MemoryStore::new()),
        settings,
    );
    let err = h
        .coordinator
        .generate_uncached(&request(LECTURE, &[Quiz]))
        .await
        .unwrap_err();
    assert!(matches!(err, cardsmith::CardsmithError::Timeout(_)));
    assert!(err.is_external());
}

#[tokio::test(start_paused = true)]
async fn initial_generation_waits_for_configured_delay() {
    let mut h = Harness::with_store(
        MockClient::new(),
        Arc::new(MemoryStore::new()),
        CoordinatorSettings::new(),
    );
    h.coordinator
        .check_or_process(&request(LECTURE, &[Flashcard]), &user())
        .await
        .unwrap();

    let early = tokio::time::timeout(Duration::from_secs(29), h.receiver.recv()).await;
    assert!(early.is_err(), "job must not be due before the delay");

    let job = h.receiver.recv().await.expect("job arrives after delay");
    h.coordinator.handle(job).await.unwrap();
    assert_eq!(h.client.call_count(), 1);
}
