//! Persistence seams for documents, generated items and uploaded files.
//!
//! The pipeline talks to persistence only through these traits:
//!
//! - [`DocumentStore`]: documents, their generated items, decks and guest
//!   links, plus [`commit`](DocumentStore::commit) for atomic multi-row
//!   deletes.
//! - [`CacheStore`](crate::cache::CacheStore): cache records.
//! - [`FileStore`]: raw uploaded bytes.
//!
//! A [`WriteBatch`] may delete a cache record alongside document rows, so
//! a `DocumentStore` and the `CacheStore` it is used with must share one
//! transactional backend. [`MemoryStore`] implements both.

mod files;
mod memory;

pub use files::{FileStore, LocalFileStore, MemoryFileStore};
pub use memory::MemoryStore;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::Result;
use crate::hasher::IdentityKey;
use crate::types::{
    ContentItem, ContentType, Deck, DeckId, Document, DocumentId, DocumentStatus, GuestUpload,
    StoredContentItem,
};

/// One delete inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Delete every generated item of a document.
    DeleteContentItems(DocumentId),
    /// Delete the cache record for `key`, but only while it still points
    /// at `document_id`. A record already re-reserved for a newer upload
    /// is left alone.
    DeleteCacheRecord {
        key: IdentityKey,
        document_id: DocumentId,
    },
    /// Delete the guest link of a document, if any.
    DeleteGuestUpload(DocumentId),
    /// Remove a document row outright, bypassing soft delete.
    ForceDeleteDocument(DocumentId),
    /// Delete a deck once no document references it.
    DeleteDeckIfEmpty(DeckId),
}

/// Deletes applied all-or-nothing by [`DocumentStore::commit`], in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Persistence for documents and everything they own.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. `Conflict` if the id exists.
    async fn create_document(&self, document: Document) -> Result<()>;

    /// Find a live (not soft-deleted) document.
    async fn find_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Find a document including soft-deleted rows.
    async fn find_document_with_deleted(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Overwrite a document. `NotFound` if it does not exist.
    async fn update_document(&self, document: &Document) -> Result<()>;

    /// Mark a document deleted without removing its row.
    async fn soft_delete_document(&self, id: DocumentId) -> Result<()>;

    /// Live documents currently in `status`.
    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>>;

    /// Append generated items to a document.
    async fn insert_content_items(&self, id: DocumentId, items: Vec<ContentItem>) -> Result<()>;

    /// Generated items of a document in insertion order.
    async fn content_items(&self, id: DocumentId) -> Result<Vec<StoredContentItem>>;

    /// Content types present among a document's items.
    async fn content_types(&self, id: DocumentId) -> Result<BTreeSet<ContentType>> {
        Ok(self
            .content_items(id)
            .await?
            .iter()
            .map(StoredContentItem::content_type)
            .collect())
    }

    async fn create_deck(&self, deck: Deck) -> Result<()>;

    async fn find_deck(&self, id: DeckId) -> Result<Option<Deck>>;

    async fn link_guest_upload(&self, link: GuestUpload) -> Result<()>;

    async fn find_guest_upload(&self, id: DocumentId) -> Result<Option<GuestUpload>>;

    /// Apply every op in `batch` atomically: all take effect or none do.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
