//! External generation service.
//!
//! [`GenerationClient`] is the seam the pipeline calls to turn a document
//! into study material. [`HttpGenerationClient`] talks to the hosted
//! service; tests substitute their own implementations.

mod http;

pub use http::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, HttpGenerationClient};

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::Result;
use crate::types::{ContentType, Difficulty, GeneratedContent, UploadedFile};

/// Produces generated content for a document.
///
/// One call is one attempt. Implementations do not retry; failures are
/// recorded by the caller and recovered by the next user request.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate `content_types` for `file` in `language` at `difficulty`.
    ///
    /// The result may contain fewer types than asked for. Callers treat
    /// absent types as missing and never as an error.
    async fn generate(
        &self,
        file: &UploadedFile,
        language: &str,
        content_types: &BTreeSet<ContentType>,
        difficulty: Difficulty,
    ) -> Result<GeneratedContent>;

    /// Client name for logs and metrics.
    fn name(&self) -> &str;
}
