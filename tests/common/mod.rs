//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use cardsmith::coordinator::JobReceiver;
use cardsmith::{
    CacheRecord, CacheStore, Cardsmith, CardsmithError, ContentItem, ContentType, Coordinator,
    CoordinatorSettings, Deck, DeckId, Difficulty, Document, DocumentId, DocumentStatus,
    DocumentStore, Exercise, Flashcard, GeneratedContent, GenerationClient, GenerationRequest,
    GuestUpload, IdentityKey, JobHandler, MemoryFileStore, MemoryStore, QuizQuestion, Result,
    StoredContentItem, UploadedFile, WriteBatch,
};

// ============================================================================
// Generation client
// ============================================================================

/// Generation client that records every call and answers with one item per
/// requested type.
#[derive(Default)]
pub struct MockClient {
    calls: Mutex<Vec<BTreeSet<ContentType>>>,
    failing: AtomicBool,
    /// Answer with no items at all.
    empty: AtomicBool,
    /// Signalled when a call starts.
    pub entered: Arc<Notify>,
    /// When set, calls wait for a permit before answering.
    gate: Option<Arc<Notify>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let client = Self::default();
        client.set_failing(true);
        client
    }

    pub fn empty() -> Self {
        let client = Self::default();
        client.empty.store(true, Ordering::SeqCst);
        client
    }

    /// A client whose calls block until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BTreeSet<ContentType>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn generate(
        &self,
        file: &UploadedFile,
        _language: &str,
        content_types: &BTreeSet<ContentType>,
        difficulty: Difficulty,
    ) -> Result<GeneratedContent> {
        self.calls.lock().unwrap().push(content_types.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(CardsmithError::Api {
                status: 502,
                message: "upstream model unavailable".into(),
            });
        }

        if self.empty.load(Ordering::SeqCst) {
            return Ok(GeneratedContent::default());
        }

        Ok(GeneratedContent::from_items(
            content_types
                .iter()
                .map(|t| item(*t, &file.filename, difficulty)),
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn item(content_type: ContentType, topic: &str, difficulty: Difficulty) -> ContentItem {
    match content_type {
        ContentType::Flashcard => ContentItem::Flashcard(Flashcard {
            question: format!("What is {topic}?"),
            answer: "A document".into(),
            difficulty,
        }),
        ContentType::Quiz => ContentItem::Quiz(QuizQuestion {
            question: format!("Which file is {topic}?"),
            options: vec![topic.to_string(), "other".into()],
            correct_answer_option: topic.to_string(),
            difficulty,
        }),
        ContentType::Exercise => ContentItem::Exercise(Exercise {
            kind: "fill_in_the_blank".into(),
            instruction: "Complete the sentence".into(),
            exercise_text: Some(format!("{topic} is a ___")),
            answer: "document".into(),
            difficulty,
            concepts: None,
            definitions: None,
        }),
    }
}

// ============================================================================
// Store with injectable commit failure
// ============================================================================

/// [`MemoryStore`] whose next `commit` or `create_document` can be made to
/// fail, standing in for a crash inside a transaction.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_next_commit: AtomicBool,
    fail_next_create: AtomicBool,
}

impl FlakyStore {
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get_record(&self, key: &IdentityKey) -> Result<Option<CacheRecord>> {
        self.inner.get_record(key).await
    }

    async fn insert_record(&self, record: CacheRecord) -> Result<CacheRecord> {
        self.inner.insert_record(record).await
    }

    async fn update_record(&self, record: CacheRecord) -> Result<CacheRecord> {
        self.inner.update_record(record).await
    }

    async fn delete_record(&self, key: &IdentityKey) -> Result<bool> {
        self.inner.delete_record(key).await
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn create_document(&self, document: Document) -> Result<()> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(CardsmithError::Storage("insert rejected".into()));
        }
        self.inner.create_document(document).await
    }

    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.find_document(id).await
    }

    async fn find_document_with_deleted(&self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.find_document_with_deleted(id).await
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        self.inner.update_document(document).await
    }

    async fn soft_delete_document(&self, id: DocumentId) -> Result<()> {
        self.inner.soft_delete_document(id).await
    }

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        self.inner.documents_with_status(status).await
    }

    async fn insert_content_items(&self, id: DocumentId, items: Vec<ContentItem>) -> Result<()> {
        self.inner.insert_content_items(id, items).await
    }

    async fn content_items(&self, id: DocumentId) -> Result<Vec<StoredContentItem>> {
        self.inner.content_items(id).await
    }

    async fn create_deck(&self, deck: Deck) -> Result<()> {
        self.inner.create_deck(deck).await
    }

    async fn find_deck(&self, id: DeckId) -> Result<Option<Deck>> {
        self.inner.find_deck(id).await
    }

    async fn link_guest_upload(&self, link: GuestUpload) -> Result<()> {
        self.inner.link_guest_upload(link).await
    }

    async fn find_guest_upload(&self, id: DocumentId) -> Result<Option<GuestUpload>> {
        self.inner.find_guest_upload(id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(CardsmithError::Storage("connection reset during commit".into()));
        }
        self.inner.commit(batch).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A coordinator wired to in-memory stores and a mock client, with the job
/// receiver left for the test to drain. [`Harness::new`] makes jobs due
/// immediately.
pub struct Harness<S = MemoryStore> {
    pub coordinator: Arc<Coordinator>,
    pub receiver: JobReceiver,
    pub store: Arc<S>,
    pub files: MemoryFileStore,
    pub client: Arc<MockClient>,
}

impl Harness<MemoryStore> {
    pub fn new(client: MockClient) -> Self {
        Self::with_store(
            client,
            Arc::new(MemoryStore::new()),
            CoordinatorSettings::new().initial_delay(std::time::Duration::ZERO),
        )
    }
}

impl<S> Harness<S>
where
    S: DocumentStore + CacheStore + 'static,
{
    pub fn with_store(client: MockClient, store: Arc<S>, settings: CoordinatorSettings) -> Self {
        let files = MemoryFileStore::new();
        let client = Arc::new(client);
        let (coordinator, receiver) = Cardsmith::builder()
            .generation_client(client.clone())
            .store(store.clone())
            .file_store(Arc::new(files.clone()))
            .settings(settings)
            .build()
            .unwrap();
        Self {
            coordinator,
            receiver,
            store,
            files,
            client,
        }
    }

    /// Run every job that is due, including jobs those jobs schedule.
    /// Returns how many ran.
    pub async fn run_due_jobs(&mut self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.receiver.try_recv() {
            let _ = self.coordinator.handle(job).await;
            ran += 1;
        }
        ran
    }
}

// ============================================================================
// Requests
// ============================================================================

pub const LECTURE: &[u8] = b"%PDF-1.7 photosynthesis lecture notes";

pub fn request(bytes: &[u8], types: &[ContentType]) -> GenerationRequest {
    GenerationRequest::new(
        UploadedFile::new("lecture.pdf", bytes.to_vec()),
        "en",
        Difficulty::Medium,
        types.iter().copied(),
    )
}

pub fn types(list: &[ContentType]) -> BTreeSet<ContentType> {
    list.iter().copied().collect()
}
