//! Background generation pipeline.
//!
//! The [`Coordinator`] sits between request handlers and the generation
//! service. Request-path operations never wait on the service (except
//! [`generate_uncached`](Coordinator::generate_uncached)): they consult the
//! [`ProcessingCache`], create a document and schedule a [`Job`]. Workers
//! then call [`run_generation`](Coordinator::run_generation) or
//! [`run_backfill`](Coordinator::run_backfill).
//!
//! Document lifecycle:
//!
//! ```text
//! Uploaded ──► Processing ──► Completed ──► (backfills add types)
//!                  │               │
//!                  ├──► Failed ──► cleanup removes every trace
//!                  └──► Cancelled ◄┘
//! ```

pub mod jobs;

pub use jobs::{Job, JobHandler, JobQueue, JobReceiver, WorkerPool, job_queue};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheStatus, Lookup, ProcessingCache};
use crate::client::GenerationClient;
use crate::error::GENERIC_FAILURE_MESSAGE;
use crate::hasher::IdentityKey;
use crate::reconcile::{format_from_existing, missing_types};
use crate::store::{DocumentStore, FileStore, WriteBatch, WriteOp};
use crate::telemetry;
use crate::types::{
    CheckOutcome, ContentType, Difficulty, Document, DocumentId, DocumentMetadata,
    DocumentStatus, GeneratedContent, GenerationRequest, GuestUpload, Owner, ReconcileOutcome,
    UploadPolicy, UploadedFile,
};
use crate::{CardsmithError, Result};

/// Timing knobs for the pipeline.
///
/// ```rust
/// # use cardsmith::CoordinatorSettings;
/// # use std::time::Duration;
/// let settings = CoordinatorSettings::new().initial_delay(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Wait before the initial generation job runs. Default: 30 seconds.
    pub initial_delay: Duration,
    /// Wait before a backfill job runs. Default: none.
    pub backfill_delay: Duration,
    /// Upper bound on one generation service call. Default: 120 seconds.
    pub generation_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            backfill_delay: Duration::ZERO,
            generation_timeout: crate::client::DEFAULT_TIMEOUT,
        }
    }
}

impl CoordinatorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn backfill_delay(mut self, delay: Duration) -> Self {
        self.backfill_delay = delay;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }
}

/// Orchestrates caching, documents and background generation.
pub struct Coordinator {
    cache: ProcessingCache,
    documents: Arc<dyn DocumentStore>,
    files: Arc<dyn FileStore>,
    client: Arc<dyn GenerationClient>,
    queue: JobQueue,
    policy: UploadPolicy,
    settings: CoordinatorSettings,
}

impl Coordinator {
    /// Assemble a coordinator. `documents` must share a transactional
    /// backend with the cache's store; see [`crate::store`].
    pub fn new(
        cache: ProcessingCache,
        documents: Arc<dyn DocumentStore>,
        files: Arc<dyn FileStore>,
        client: Arc<dyn GenerationClient>,
        queue: JobQueue,
    ) -> Self {
        Self {
            cache,
            documents,
            files,
            client,
            queue,
            policy: UploadPolicy::default(),
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ProcessingCache {
        &self.cache
    }

    // =========================================================================
    // Request path
    // =========================================================================

    /// Serve a generation request from cache or start generating it.
    ///
    /// Validation failures return an error and touch nothing. Otherwise the
    /// outcome is `Processing` while generation runs and `Done` once
    /// material exists. A `Done` outcome may list `pending_types` when the
    /// document lacks some requested types; a backfill for them has been
    /// scheduled.
    #[instrument(
        skip(self, request, owner),
        fields(
            filename = %request.file.filename,
            language = %request.language,
            difficulty = %request.difficulty,
        )
    )]
    pub async fn check_or_process(
        &self,
        request: &GenerationRequest,
        owner: &Owner,
    ) -> Result<CheckOutcome> {
        self.policy.validate(request)?;
        let key = IdentityKey::for_file(&request.file.bytes, &request.language, request.difficulty);

        // A done record whose document is gone or unusable is dropped and
        // the lookup repeated once.
        for _ in 0..2 {
            match self.cache.lookup_or_reserve(&key).await? {
                Lookup::Reserved(_) => return self.start_generation(&key, request, owner).await,
                Lookup::InProgress(record) => {
                    if let Some(document_id) = record.linked_document_id {
                        self.join_in_flight(document_id, &request.content_types)
                            .await?;
                    }
                    return Ok(CheckOutcome::processing(record.linked_document_id));
                }
                Lookup::Done(record) => {
                    if let Some(outcome) = self.serve_cached(&record, request).await? {
                        return Ok(outcome);
                    }
                }
            }
        }

        debug!(identity_key = key.short(), "record kept changing, reporting processing");
        Ok(CheckOutcome::processing(None))
    }

    /// Schedule generation of requested types a document lacks.
    ///
    /// Types already present are never regenerated. While the initial
    /// generation is still pending the types are added to its request
    /// instead of scheduling a separate backfill.
    #[instrument(skip(self, requested), fields(%document_id))]
    pub async fn reconcile_missing_types(
        &self,
        document_id: DocumentId,
        requested: &BTreeSet<ContentType>,
    ) -> Result<ReconcileOutcome> {
        let mut document = self.require_document(document_id).await?;
        if !document.status.is_live() {
            return Err(CardsmithError::InvalidState(format!(
                "document {document_id} is {:?}",
                document.status
            )));
        }

        let existing = self.documents.content_types(document_id).await?;
        let missing = missing_types(&existing, requested);
        if missing.is_empty() {
            return Ok(ReconcileOutcome::NothingMissing);
        }

        document
            .metadata
            .requested_types
            .extend(requested.iter().copied());

        if document.status != DocumentStatus::Completed {
            document.updated_at = Utc::now();
            self.documents.update_document(&document).await?;
            debug!(?missing, "added to pending initial generation");
            return Ok(ReconcileOutcome::Scheduled(missing));
        }

        document
            .metadata
            .pending_types
            .extend(missing.iter().copied());
        document.updated_at = Utc::now();
        self.documents.update_document(&document).await?;

        let job = Job::Backfill {
            document_id,
            content_types: missing.clone(),
        };
        let scheduled = self.queue.schedule(job, self.settings.backfill_delay).await?;
        info!(?missing, scheduled, "backfill requested");
        Ok(ReconcileOutcome::Scheduled(missing))
    }

    /// Remove a failed document and everything attached to it.
    ///
    /// Returns `true` if something was removed. Safe to call repeatedly and
    /// concurrently: documents that are missing or not failed are left
    /// alone. The stored file goes first; the rows go in one atomic batch,
    /// so a cleanup interrupted between the two converges on retry.
    #[instrument(skip(self), fields(%document_id))]
    pub async fn cleanup_failed_document(&self, document_id: DocumentId) -> Result<bool> {
        let Some(document) = self.documents.find_document_with_deleted(document_id).await? else {
            return Ok(false);
        };
        if document.status != DocumentStatus::Failed {
            return Ok(false);
        }

        let file_removed = self.files.delete(&document.file_path).await?;

        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::DeleteContentItems(document_id))
            .push(WriteOp::DeleteCacheRecord {
                key: document.identity_key.clone(),
                document_id,
            })
            .push(WriteOp::DeleteGuestUpload(document_id))
            .push(WriteOp::ForceDeleteDocument(document_id));
        if let Some(deck_id) = document.deck_id {
            batch.push(WriteOp::DeleteDeckIfEmpty(deck_id));
        }
        self.documents.commit(batch).await?;

        metrics::counter!(telemetry::CLEANUPS_TOTAL).increment(1);
        info!(file_removed, "failed document cleaned up");
        Ok(true)
    }

    /// Clean up every failed document. Returns how many were removed.
    pub async fn sweep_failed_documents(&self) -> Result<usize> {
        let failed = self
            .documents
            .documents_with_status(DocumentStatus::Failed)
            .await?;
        let results = join_all(failed.iter().map(|d| self.cleanup_failed_document(d.id))).await;

        let mut removed = 0;
        for (document, result) in failed.iter().zip(results) {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(document_id = %document.id, error = %e, "cleanup failed"),
            }
        }
        Ok(removed)
    }

    /// Polling surface for a document.
    ///
    /// `requested` narrows a done payload to the types the caller asked
    /// for; `None` means every type the document was asked for. Reporting a
    /// failure also cleans the document up, so the next upload of the same
    /// file starts fresh.
    #[instrument(skip(self, requested), fields(%document_id))]
    pub async fn document_status(
        &self,
        document_id: DocumentId,
        requested: Option<&BTreeSet<ContentType>>,
    ) -> Result<CheckOutcome> {
        let document = self.require_document(document_id).await?;

        match document.status {
            DocumentStatus::Uploaded | DocumentStatus::Processing => {
                Ok(CheckOutcome::processing(Some(document_id)))
            }
            DocumentStatus::Cancelled => Ok(CheckOutcome::Cancelled { document_id }),
            DocumentStatus::Failed => {
                let message = document
                    .metadata
                    .error_message
                    .clone()
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
                if let Err(e) = self.cleanup_failed_document(document_id).await {
                    warn!(error = %e, "cleanup after failure report did not finish");
                }
                Ok(CheckOutcome::Failed {
                    document_id: Some(document_id),
                    message,
                })
            }
            DocumentStatus::Completed => {
                let requested = requested
                    .cloned()
                    .unwrap_or_else(|| document.metadata.requested_types.clone());
                let items = self.documents.content_items(document_id).await?;
                let pending_types = document
                    .metadata
                    .pending_types
                    .intersection(&requested)
                    .copied()
                    .collect();
                Ok(CheckOutcome::Done {
                    document_id: Some(document_id),
                    payload: format_from_existing(&items, &requested),
                    pending_types,
                })
            }
        }
    }

    /// Cancel processing of a document.
    ///
    /// Workers notice at their next status check and discard their output.
    /// Cancelling twice is a no-op; a failed document cannot be cancelled.
    #[instrument(skip(self), fields(%document_id))]
    pub async fn cancel(&self, document_id: DocumentId) -> Result<()> {
        let mut document = self.require_document(document_id).await?;
        match document.status {
            DocumentStatus::Cancelled => Ok(()),
            DocumentStatus::Failed => Err(CardsmithError::InvalidState(format!(
                "document {document_id} already failed"
            ))),
            _ => {
                document.transition(DocumentStatus::Cancelled);
                self.documents.update_document(&document).await?;
                info!("document cancelled");
                Ok(())
            }
        }
    }

    /// Generate without caching, waiting for the service.
    ///
    /// Blocks for one service call, bounded by the generation timeout.
    /// Nothing is persisted.
    #[instrument(skip(self, request), fields(filename = %request.file.filename))]
    pub async fn generate_uncached(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        self.policy.validate(request)?;
        let content = self
            .call_client(
                "uncached",
                &request.file,
                &request.language.to_lowercase(),
                &request.content_types,
                request.difficulty,
            )
            .await?;
        Ok(content.retain_types(&request.content_types))
    }

    // =========================================================================
    // Worker path
    // =========================================================================

    /// Initial generation for a document.
    ///
    /// Does nothing unless the document is still processing. Errors are
    /// returned to the caller; [`JobHandler::handle`] records them on the
    /// document.
    #[instrument(skip(self), fields(%document_id))]
    pub async fn run_generation(&self, document_id: DocumentId) -> Result<()> {
        let Some(document) = self.documents.find_document(document_id).await? else {
            warn!("document vanished before generation");
            return Ok(());
        };
        match document.status {
            DocumentStatus::Processing => {}
            DocumentStatus::Cancelled => {
                debug!("cancelled before generation started");
                self.release_reservation(&document.identity_key, document_id)
                    .await;
                return Ok(());
            }
            status => {
                debug!(?status, "nothing to generate");
                return Ok(());
            }
        }

        let asked = document.metadata.requested_types.clone();
        let file = self.load_file(&document).await?;
        let result = self
            .call_client(
                "generate",
                &file,
                &document.language,
                &asked,
                document.difficulty,
            )
            .await;

        // The owner may have cancelled while the service was working, in
        // which case the result is dropped whether or not the call failed.
        let current = self.documents.find_document(document_id).await?;
        let Some(mut current) = current.filter(|d| d.status == DocumentStatus::Processing) else {
            info!(ok = result.is_ok(), "document no longer processing, discarding result");
            self.release_reservation(&document.identity_key, document_id)
                .await;
            return Ok(());
        };
        let content = result?;

        let content = content.retain_types(&current.metadata.requested_types);
        let delivered = content.content_types();
        self.documents
            .insert_content_items(document_id, content.clone().into_items())
            .await?;

        // Types requested after the call started still need generating.
        let added: BTreeSet<ContentType> = current
            .metadata
            .requested_types
            .difference(&asked)
            .copied()
            .collect();
        current.metadata.pending_types = added.clone();
        current.transition(DocumentStatus::Completed);
        self.documents.update_document(&current).await?;

        if self
            .owns_reservation(&current.identity_key, document_id, CacheStatus::Processing)
            .await
        {
            if let Err(e) = self.cache.complete(&current.identity_key, content).await {
                warn!(error = %e, "could not complete cache record");
            }
        }

        if !added.is_empty() {
            let job = Job::Backfill {
                document_id,
                content_types: added,
            };
            self.queue.schedule(job, self.settings.backfill_delay).await?;
        }

        info!(?delivered, "generation completed");
        Ok(())
    }

    /// Generate `requested` types a completed document still lacks.
    ///
    /// Existing types are checked again at execution time, so a backfill
    /// that lost a race with another one makes no service call. A failed
    /// backfill is recorded on the document but does not fail it.
    #[instrument(skip(self, requested), fields(%document_id))]
    pub async fn run_backfill(
        &self,
        document_id: DocumentId,
        requested: &BTreeSet<ContentType>,
    ) -> Result<()> {
        let Some(mut document) = self.documents.find_document(document_id).await? else {
            warn!("document vanished before backfill");
            return Ok(());
        };
        if document.status != DocumentStatus::Completed {
            debug!(status = ?document.status, "skipping backfill");
            return Ok(());
        }

        let existing = self.documents.content_types(document_id).await?;
        let missing = missing_types(&existing, requested);
        if missing.is_empty() {
            metrics::counter!(telemetry::BACKFILL_SKIPPED_TOTAL).increment(1);
            debug!("requested types already present");
            document.metadata.pending_types.retain(|t| !requested.contains(t));
            document.updated_at = Utc::now();
            self.documents.update_document(&document).await?;
            self.sync_cache_payload(&document).await;
            return Ok(());
        }

        let file = self.load_file(&document).await?;
        let result = self
            .call_client(
                "backfill",
                &file,
                &document.language,
                &missing,
                document.difficulty,
            )
            .await;

        let Some(mut current) = self.documents.find_document(document_id).await? else {
            return Ok(());
        };
        let content = match result {
            Ok(content) => content,
            Err(e) => {
                current.metadata.backfill_error = Some(e.to_string());
                current.metadata.pending_types.retain(|t| !missing.contains(t));
                current.updated_at = Utc::now();
                self.documents.update_document(&current).await?;
                return Err(e);
            }
        };
        if current.status != DocumentStatus::Completed {
            info!(status = ?current.status, "discarding backfilled content");
            return Ok(());
        }

        // Another backfill may have delivered some types meanwhile.
        let existing = self.documents.content_types(document_id).await?;
        let still_missing = missing_types(&existing, &missing);
        let content = content.retain_types(&still_missing);
        let delivered = content.content_types();
        if !content.is_empty() {
            self.documents
                .insert_content_items(document_id, content.into_items())
                .await?;
        }

        current.metadata.pending_types.retain(|t| !requested.contains(t));
        current.metadata.backfill_error = None;
        current.updated_at = Utc::now();
        self.documents.update_document(&current).await?;
        self.sync_cache_payload(&current).await;

        info!(?delivered, "backfill completed");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn start_generation(
        &self,
        key: &IdentityKey,
        request: &GenerationRequest,
        owner: &Owner,
    ) -> Result<CheckOutcome> {
        let document_id = DocumentId::new();
        let extension = request.file.extension().unwrap_or_default();
        let result = match self
            .files
            .put(document_id, &extension, &request.file.bytes)
            .await
        {
            Ok(file_path) => {
                let created = self
                    .create_document(document_id, &file_path, key, request, owner)
                    .await;
                if created.is_err() {
                    self.discard_orphaned_file(document_id, &file_path).await;
                }
                created
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(CheckOutcome::processing(Some(document_id))),
            Err(e) => {
                error!(%document_id, error = %e, "could not start generation");
                self.record_generation_failure(document_id, &e).await;
                if let Ok(Some(record)) = self.cache.get(key).await {
                    let ours = record.linked_document_id.is_none_or(|id| id == document_id);
                    if ours && record.status == CacheStatus::Processing {
                        if let Err(fail_err) = self.cache.fail(key).await {
                            warn!(error = %fail_err, "could not release reservation");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn create_document(
        &self,
        document_id: DocumentId,
        file_path: &str,
        key: &IdentityKey,
        request: &GenerationRequest,
        owner: &Owner,
    ) -> Result<()> {
        let now = Utc::now();
        let mut document = Document {
            id: document_id,
            owner: owner.clone(),
            deck_id: request.deck_id,
            file_path: file_path.to_string(),
            identity_key: key.clone(),
            language: request.language.to_lowercase(),
            difficulty: request.difficulty,
            status: DocumentStatus::Uploaded,
            metadata: DocumentMetadata {
                original_filename: request.file.filename.clone(),
                file_size: request.file.size(),
                requested_types: request.content_types.clone(),
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.documents.create_document(document.clone()).await?;

        if let Owner::Guest(token) = owner {
            self.documents
                .link_guest_upload(GuestUpload {
                    guest_token: token.clone(),
                    document_id,
                })
                .await?;
        }

        // Processing before the link: a request that finds the link joins
        // a document that is already processing.
        document.transition(DocumentStatus::Processing);
        self.documents.update_document(&document).await?;

        self.cache.link_document(key, document_id).await?;

        self.queue
            .schedule(Job::Generate { document_id }, self.settings.initial_delay)
            .await?;

        info!(
            %document_id,
            identity_key = key.short(),
            types = ?request.content_types,
            "generation scheduled"
        );
        Ok(())
    }

    /// Serve a done record. `None` means the record was dropped and the
    /// lookup should be repeated.
    async fn serve_cached(
        &self,
        record: &crate::cache::CacheRecord,
        request: &GenerationRequest,
    ) -> Result<Option<CheckOutcome>> {
        let Some(document_id) = record.linked_document_id else {
            let payload = record.result_payload.clone().unwrap_or_default();
            if missing_types(&payload.content_types(), &request.content_types).is_empty() {
                return Ok(Some(CheckOutcome::Done {
                    document_id: None,
                    payload: payload.retain_types(&request.content_types),
                    pending_types: BTreeSet::new(),
                }));
            }
            self.cache.invalidate(record).await?;
            return Ok(None);
        };

        let document = self.documents.find_document(document_id).await?;
        match document.map(|d| d.status) {
            Some(DocumentStatus::Failed) => {
                self.cleanup_failed_document(document_id).await?;
                Ok(None)
            }
            None | Some(DocumentStatus::Cancelled) => {
                debug!(%document_id, "cached document unusable, dropping record");
                self.cache.invalidate(record).await?;
                Ok(None)
            }
            Some(_) => {
                let items = self.documents.content_items(document_id).await?;
                let existing: BTreeSet<ContentType> = items.iter().map(|i| i.content_type()).collect();
                let missing = missing_types(&existing, &request.content_types);

                let pending_types = if missing.is_empty() {
                    BTreeSet::new()
                } else {
                    match self
                        .reconcile_missing_types(document_id, &request.content_types)
                        .await?
                    {
                        ReconcileOutcome::Scheduled(types) => types,
                        ReconcileOutcome::NothingMissing => BTreeSet::new(),
                    }
                };

                Ok(Some(CheckOutcome::Done {
                    document_id: Some(document_id),
                    payload: format_from_existing(&items, &request.content_types),
                    pending_types,
                }))
            }
        }
    }

    /// Add `requested` types to the document behind an in-flight record.
    ///
    /// A document that can no longer take types (cancelled, failed or gone)
    /// is left alone; the caller still reports processing.
    async fn join_in_flight(
        &self,
        document_id: DocumentId,
        requested: &BTreeSet<ContentType>,
    ) -> Result<()> {
        match self.reconcile_missing_types(document_id, requested).await {
            Ok(outcome) => {
                debug!(%document_id, ?outcome, "joined in-flight generation");
                Ok(())
            }
            Err(e @ (CardsmithError::InvalidState(_) | CardsmithError::NotFound(_))) => {
                debug!(%document_id, error = %e, "in-flight document cannot take more types");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a stored upload that no document row refers to.
    async fn discard_orphaned_file(&self, document_id: DocumentId, file_path: &str) {
        match self.documents.find_document_with_deleted(document_id).await {
            Ok(None) => {}
            Ok(Some(_)) => return,
            Err(e) => {
                warn!(%document_id, error = %e, "could not check for document, keeping file");
                return;
            }
        }
        if let Err(e) = self.files.delete(file_path).await {
            warn!(%document_id, error = %e, "could not delete orphaned upload");
        }
    }

    async fn require_document(&self, document_id: DocumentId) -> Result<Document> {
        self.documents
            .find_document(document_id)
            .await?
            .ok_or_else(|| CardsmithError::NotFound(format!("document {document_id}")))
    }

    async fn load_file(&self, document: &Document) -> Result<UploadedFile> {
        let bytes = self.files.get(&document.file_path).await?;
        Ok(UploadedFile::new(
            document.metadata.original_filename.clone(),
            bytes,
        ))
    }

    /// One bounded call to the generation service.
    async fn call_client(
        &self,
        operation: &'static str,
        file: &UploadedFile,
        language: &str,
        content_types: &BTreeSet<ContentType>,
        difficulty: Difficulty,
    ) -> Result<GeneratedContent> {
        let start = Instant::now();
        let timeout = self.settings.generation_timeout;
        let result = match tokio::time::timeout(
            timeout,
            self.client
                .generate(file, language, content_types, difficulty),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CardsmithError::Timeout(timeout)),
        };

        let result = result.and_then(|content| {
            if !content_types.is_empty() && content.content_types().is_disjoint(content_types) {
                return Err(CardsmithError::Generation(
                    "service returned none of the requested types".into(),
                ));
            }
            Ok(content)
        });

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::GENERATION_CALLS_TOTAL,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(telemetry::GENERATION_DURATION_SECONDS, "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(client = self.client.name(), operation, error = %e, "generation call failed");
        }
        result
    }

    /// Whether the cache record for `key` still belongs to `document_id`.
    async fn owns_reservation(
        &self,
        key: &IdentityKey,
        document_id: DocumentId,
        status: CacheStatus,
    ) -> bool {
        match self.cache.get(key).await {
            Ok(Some(record)) => {
                record.linked_document_id == Some(document_id) && record.status == status
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "could not read cache record");
                false
            }
        }
    }

    /// Fail the reservation held for `document_id`, if it still holds one.
    async fn release_reservation(&self, key: &IdentityKey, document_id: DocumentId) {
        if !self
            .owns_reservation(key, document_id, CacheStatus::Processing)
            .await
        {
            return;
        }
        if let Err(e) = self.cache.fail(key).await {
            warn!(%document_id, error = %e, "could not release reservation");
        }
    }

    /// Mark a document failed after an error in its initial generation.
    ///
    /// The reservation is released whatever the document's status, so a
    /// cancelled document never pins its cache record. Guests get
    /// [`CardsmithError::user_message`] stored in place of the raw error.
    async fn record_generation_failure(&self, document_id: DocumentId, err: &CardsmithError) {
        let mut document = match self.documents.find_document(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return,
            Err(e) => {
                error!(%document_id, error = %e, "could not load document to record failure");
                return;
            }
        };
        let key = document.identity_key.clone();

        if matches!(
            document.status,
            DocumentStatus::Uploaded | DocumentStatus::Processing
        ) {
            let message = if document.owner.is_guest() {
                err.user_message()
            } else {
                err.to_string()
            };
            document.metadata.error_message = Some(message);
            document.transition(DocumentStatus::Failed);
            if let Err(e) = self.documents.update_document(&document).await {
                error!(%document_id, error = %e, "could not record generation failure");
            }
        }
        self.release_reservation(&key, document_id).await;
    }

    /// Bring a done cache record up to date with the document's items.
    async fn sync_cache_payload(&self, document: &Document) {
        let key = &document.identity_key;
        if !self
            .owns_reservation(key, document.id, CacheStatus::Done)
            .await
        {
            return;
        }
        let items = match self.documents.content_items(document.id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "could not load items for cache");
                return;
            }
        };
        let all: BTreeSet<ContentType> = ContentType::ALL.into_iter().collect();
        if let Err(e) = self
            .cache
            .merge_payload(key, format_from_existing(&items, &all))
            .await
        {
            warn!(document_id = %document.id, error = %e, "could not merge cache payload");
        }
    }
}

#[async_trait]
impl JobHandler for Coordinator {
    async fn handle(&self, job: Job) -> Result<()> {
        match job {
            Job::Generate { document_id } => {
                let result = self.run_generation(document_id).await;
                if let Err(e) = &result {
                    error!(%document_id, error = %e, "generation failed");
                    self.record_generation_failure(document_id, e).await;
                }
                result
            }
            Job::Backfill {
                document_id,
                content_types,
            } => self.run_backfill(document_id, &content_types).await,
        }
    }
}
