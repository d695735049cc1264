//! Cardsmith - deduplicating generation cache for AI-built study material
//!
//! Uploaded documents are turned into flashcards, quiz questions and
//! exercises by an external generation service. Generation is slow and
//! costs money, so this crate makes sure each distinct document is
//! generated once:
//!
//! - uploads are identified by content, language and difficulty
//!   ([`IdentityKey`]), never by filename;
//! - a [`ProcessingCache`] lets exactly one request start generation per
//!   identity while others are told to check back;
//! - requests for content types a document lacks schedule a backfill for
//!   the missing types only;
//! - failed documents are cleaned up so the next upload starts fresh.
//!
//! # Example
//!
//! ```rust,no_run
//! use cardsmith::{Cardsmith, ContentType, Difficulty, GenerationRequest, Owner, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> cardsmith::Result<()> {
//!     let pipeline = Cardsmith::builder()
//!         .generation_service("https://generate.example.com", Some("sk-...".into()))
//!         .start()?;
//!
//!     let request = GenerationRequest::new(
//!         UploadedFile::new("notes.pdf", std::fs::read("notes.pdf")?),
//!         "en",
//!         Difficulty::Medium,
//!         [ContentType::Flashcard, ContentType::Quiz],
//!     );
//!     let outcome = pipeline
//!         .coordinator()
//!         .check_or_process(&request, &Owner::User("user-1".into()))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hasher;
pub mod reconcile;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use builder::{Cardsmith, CardsmithBuilder, Pipeline};
pub use cache::{CacheConfig, CacheRecord, CacheStatus, CacheStore, Lookup, ProcessingCache};
pub use client::{GenerationClient, HttpGenerationClient};
pub use config::{Config, Secrets};
pub use coordinator::{Coordinator, CoordinatorSettings, Job, JobHandler, WorkerPool};
pub use error::{CardsmithError, GENERIC_FAILURE_MESSAGE, Result};
pub use hasher::IdentityKey;
pub use store::{
    DocumentStore, FileStore, LocalFileStore, MemoryFileStore, MemoryStore, WriteBatch, WriteOp,
};

// Re-export all types
pub use types::{
    CheckOutcome, ContentItem, ContentType, Deck, DeckId, Difficulty, Document, DocumentId,
    DocumentMetadata, DocumentStatus, Exercise, Flashcard, GeneratedContent, GenerationRequest,
    GuestUpload, Owner, QuizQuestion, ReconcileOutcome, StoredContentItem, UploadPolicy,
    UploadedFile,
};
