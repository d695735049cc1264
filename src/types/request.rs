//! Generation requests and upload validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::content::{ContentType, Difficulty};
use super::document::DeckId;
use crate::{CardsmithError, Result};

/// Raw bytes of an uploaded document plus its original name.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension, if the filename has one.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Who asked for the generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    /// Authenticated user, identified by the identity provider's subject.
    User(String),
    /// Anonymous upload, identified by a guest session token.
    Guest(String),
}

impl Owner {
    pub fn is_guest(&self) -> bool {
        matches!(self, Owner::Guest(_))
    }
}

/// A request to turn a document into study material.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub file: UploadedFile,
    /// ISO 639-1 language code of the material to generate.
    pub language: String,
    pub difficulty: Difficulty,
    pub content_types: BTreeSet<ContentType>,
    /// Deck the resulting document is filed under.
    pub deck_id: Option<DeckId>,
}

impl GenerationRequest {
    pub fn new(
        file: UploadedFile,
        language: impl Into<String>,
        difficulty: Difficulty,
        content_types: impl IntoIterator<Item = ContentType>,
    ) -> Self {
        Self {
            file,
            language: language.into(),
            difficulty,
            content_types: content_types.into_iter().collect(),
            deck_id: None,
        }
    }

    /// File the resulting document under a deck.
    pub fn deck(mut self, deck_id: DeckId) -> Self {
        self.deck_id = Some(deck_id);
        self
    }
}

/// Upload rules checked before any cache interaction.
///
/// ```rust
/// # use cardsmith::UploadPolicy;
/// let policy = UploadPolicy::new()
///     .max_file_bytes(5 * 1024 * 1024)
///     .languages(["en", "fr"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Largest accepted file. Default: 10 MiB.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Accepted file extensions, lowercase.
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Accepted ISO 639-1 language codes.
    #[serde(default = "default_languages")]
    pub supported_languages: Vec<String>,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_extensions() -> Vec<String> {
    ["pdf", "docx", "pptx", "txt"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_languages() -> Vec<String> {
    ["en", "fr", "de", "es", "it", "nl", "pt"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_extensions: default_extensions(),
            supported_languages: default_languages(),
        }
    }
}

impl UploadPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest accepted file size in bytes.
    pub fn max_file_bytes(mut self, n: u64) -> Self {
        self.max_file_bytes = n;
        self
    }

    /// Replace the accepted extensions.
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.into().to_lowercase())
            .collect();
        self
    }

    /// Replace the accepted languages.
    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_languages = languages
            .into_iter()
            .map(|l| l.into().to_lowercase())
            .collect();
        self
    }

    /// Reject requests the pipeline must never see.
    pub fn validate(&self, request: &GenerationRequest) -> Result<()> {
        if request.file.bytes.is_empty() {
            return Err(CardsmithError::Validation("file is empty".into()));
        }

        let size = request.file.size();
        if size > self.max_file_bytes {
            return Err(CardsmithError::FileTooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        match request.file.extension() {
            Some(ext) if self.allowed_extensions.iter().any(|a| *a == ext) => {}
            Some(ext) => return Err(CardsmithError::UnsupportedFileType(ext)),
            None => {
                return Err(CardsmithError::UnsupportedFileType(
                    request.file.filename.clone(),
                ));
            }
        }

        let language = request.language.to_lowercase();
        if !self.supported_languages.iter().any(|l| *l == language) {
            return Err(CardsmithError::UnsupportedLanguage(request.language.clone()));
        }

        if request.content_types.is_empty() {
            return Err(CardsmithError::Validation(
                "at least one content type must be requested".into(),
            ));
        }

        Ok(())
    }
}
