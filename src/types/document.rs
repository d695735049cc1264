//! Persisted documents, their generated items and the rows cleanup touches.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::{ContentItem, ContentType, Difficulty};
use super::request::Owner;
use crate::hasher::IdentityKey;

/// Document identifier (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Deck (collection of documents) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckId(pub Uuid);

impl DeckId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DeckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Processing state of a document.
///
/// ```text
/// Uploaded ──► Processing ──► Completed
///                  │              │
///                  ├──► Failed    │
///                  └──► Cancelled ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DocumentStatus {
    /// Whether a worker may still act on a document in this state.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Uploaded | DocumentStatus::Processing | DocumentStatus::Completed
        )
    }
}

/// JSON metadata stored alongside a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub original_filename: String,
    pub file_size: u64,
    /// Union of every type set ever requested for this document.
    #[serde(default)]
    pub requested_types: BTreeSet<ContentType>,
    /// Types a scheduled backfill has not delivered yet.
    #[serde(default)]
    pub pending_types: BTreeSet<ContentType>,
    /// Error from the initial generation; set when status is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Error from the most recent backfill. Does not fail the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill_error: Option<String>,
}

/// An uploaded document and the state of its generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner: Owner,
    pub deck_id: Option<DeckId>,
    /// Opaque path understood by the [`FileStore`](crate::store::FileStore).
    pub file_path: String,
    pub identity_key: IdentityKey,
    pub language: String,
    pub difficulty: Difficulty,
    pub status: DocumentStatus,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Soft-deleted rows stay queryable until forced out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Move to a new status, bumping `updated_at`.
    pub fn transition(&mut self, status: DocumentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A persisted generated item owned by a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContentItem {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub item: ContentItem,
    pub created_at: DateTime<Utc>,
}

impl StoredContentItem {
    pub fn new(document_id: DocumentId, item: ContentItem) -> Self {
        Self {
            id: Uuid::now_v7(),
            document_id,
            item,
            created_at: Utc::now(),
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.item.content_type()
    }
}

/// A collection of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub id: DeckId,
    pub owner: Owner,
    pub name: String,
}

impl Deck {
    pub fn new(owner: Owner, name: impl Into<String>) -> Self {
        Self {
            id: DeckId::new(),
            owner,
            name: name.into(),
        }
    }
}

/// Link between a guest session and a document it uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestUpload {
    pub guest_token: String,
    pub document_id: DocumentId,
}
