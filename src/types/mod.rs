//! Public types for the Cardsmith API.

mod content;
mod document;
mod outcome;
mod request;

pub use content::{
    ContentItem, ContentType, Difficulty, Exercise, Flashcard, GeneratedContent, QuizQuestion,
};
pub use document::{
    Deck, DeckId, Document, DocumentId, DocumentMetadata, DocumentStatus, GuestUpload,
    StoredContentItem,
};
pub use outcome::{CheckOutcome, ReconcileOutcome};
pub use request::{GenerationRequest, Owner, UploadPolicy, UploadedFile};
