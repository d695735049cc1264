//! In-memory implementation of both store traits.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{DocumentStore, WriteBatch, WriteOp};
use crate::cache::{CacheRecord, CacheStore};
use crate::hasher::IdentityKey;
use crate::types::{
    ContentItem, Deck, DeckId, Document, DocumentId, DocumentStatus, GuestUpload,
    StoredContentItem,
};
use crate::{CardsmithError, Result};

#[derive(Debug, Clone, Default)]
struct State {
    records: HashMap<IdentityKey, CacheRecord>,
    documents: HashMap<DocumentId, Document>,
    items: HashMap<DocumentId, Vec<StoredContentItem>>,
    decks: HashMap<DeckId, Deck>,
    guest_uploads: HashMap<DocumentId, GuestUpload>,
}

impl State {
    fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::DeleteContentItems(id) => {
                self.items.remove(id);
            }
            WriteOp::DeleteCacheRecord { key, document_id } => {
                let linked = self
                    .records
                    .get(key)
                    .is_some_and(|r| r.linked_document_id == Some(*document_id));
                if linked {
                    self.records.remove(key);
                }
            }
            WriteOp::DeleteGuestUpload(id) => {
                self.guest_uploads.remove(id);
            }
            WriteOp::ForceDeleteDocument(id) => {
                self.documents.remove(id);
            }
            WriteOp::DeleteDeckIfEmpty(deck_id) => {
                let in_use = self
                    .documents
                    .values()
                    .any(|d| d.deck_id == Some(*deck_id));
                if !in_use {
                    self.decks.remove(deck_id);
                }
            }
        }
    }
}

/// Shared in-memory backend for documents and cache records.
///
/// All tables live behind one lock, so a [`WriteBatch`] is applied to a
/// copy and swapped in whole. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| CardsmithError::Storage("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| CardsmithError::Storage("memory store lock poisoned".into()))
    }

    /// Number of cache records.
    pub fn record_count(&self) -> usize {
        self.read().map(|s| s.records.len()).unwrap_or(0)
    }

    /// Number of document rows, soft-deleted included.
    pub fn document_count(&self) -> usize {
        self.read().map(|s| s.documents.len()).unwrap_or(0)
    }

    /// Number of generated items across all documents.
    pub fn item_count(&self) -> usize {
        self.read()
            .map(|s| s.items.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of decks.
    pub fn deck_count(&self) -> usize {
        self.read().map(|s| s.decks.len()).unwrap_or(0)
    }

    /// Number of guest links.
    pub fn guest_upload_count(&self) -> usize {
        self.read().map(|s| s.guest_uploads.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_record(&self, key: &IdentityKey) -> Result<Option<CacheRecord>> {
        Ok(self.read()?.records.get(key).cloned())
    }

    async fn insert_record(&self, record: CacheRecord) -> Result<CacheRecord> {
        let mut state = self.write()?;
        if state.records.contains_key(&record.identity_key) {
            return Err(CardsmithError::Conflict(format!(
                "cache record {} already exists",
                record.identity_key.short()
            )));
        }
        state
            .records
            .insert(record.identity_key.clone(), record.clone());
        Ok(record)
    }

    async fn update_record(&self, mut record: CacheRecord) -> Result<CacheRecord> {
        let mut state = self.write()?;
        let current = state.records.get(&record.identity_key).ok_or_else(|| {
            CardsmithError::NotFound(format!("cache record {}", record.identity_key.short()))
        })?;
        if current.version != record.version {
            return Err(CardsmithError::Conflict(format!(
                "cache record {} is at version {}, update was based on {}",
                record.identity_key.short(),
                current.version,
                record.version
            )));
        }
        record.version += 1;
        state
            .records
            .insert(record.identity_key.clone(), record.clone());
        Ok(record)
    }

    async fn delete_record(&self, key: &IdentityKey) -> Result<bool> {
        Ok(self.write()?.records.remove(key).is_some())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, document: Document) -> Result<()> {
        let mut state = self.write()?;
        if state.documents.contains_key(&document.id) {
            return Err(CardsmithError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }
        state.documents.insert(document.id, document);
        Ok(())
    }

    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self
            .read()?
            .documents
            .get(&id)
            .filter(|d| !d.is_deleted())
            .cloned())
    }

    async fn find_document_with_deleted(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        let mut state = self.write()?;
        let slot = state
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| CardsmithError::NotFound(format!("document {}", document.id)))?;
        *slot = document.clone();
        Ok(())
    }

    async fn soft_delete_document(&self, id: DocumentId) -> Result<()> {
        let mut state = self.write()?;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| CardsmithError::NotFound(format!("document {id}")))?;
        document.deleted_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| d.status == status && !d.is_deleted())
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }

    async fn insert_content_items(&self, id: DocumentId, items: Vec<ContentItem>) -> Result<()> {
        let mut state = self.write()?;
        if !state.documents.contains_key(&id) {
            return Err(CardsmithError::NotFound(format!("document {id}")));
        }
        state
            .items
            .entry(id)
            .or_default()
            .extend(items.into_iter().map(|item| StoredContentItem::new(id, item)));
        Ok(())
    }

    async fn content_items(&self, id: DocumentId) -> Result<Vec<StoredContentItem>> {
        Ok(self.read()?.items.get(&id).cloned().unwrap_or_default())
    }

    async fn create_deck(&self, deck: Deck) -> Result<()> {
        let mut state = self.write()?;
        if state.decks.contains_key(&deck.id) {
            return Err(CardsmithError::Conflict(format!("deck {} already exists", deck.id)));
        }
        state.decks.insert(deck.id, deck);
        Ok(())
    }

    async fn find_deck(&self, id: DeckId) -> Result<Option<Deck>> {
        Ok(self.read()?.decks.get(&id).cloned())
    }

    async fn link_guest_upload(&self, link: GuestUpload) -> Result<()> {
        self.write()?.guest_uploads.insert(link.document_id, link);
        Ok(())
    }

    async fn find_guest_upload(&self, id: DocumentId) -> Result<Option<GuestUpload>> {
        Ok(self.read()?.guest_uploads.get(&id).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.write()?;
        let mut next = state.clone();
        for op in batch.ops() {
            next.apply(op);
        }
        *state = next;
        Ok(())
    }
}
