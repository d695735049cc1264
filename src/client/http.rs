//! HTTP client for the hosted generation service.
//!
//! Uploads the document as `multipart/form-data` to `{base_url}/generate`
//! and expects the payload object back:
//!
//! ```json
//! { "flashcard": [{"question": "...", "answer": "...", "difficulty": "easy"}],
//!   "quiz": [...], "exercise": [...] }
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument};

use super::GenerationClient;
use crate::types::{ContentType, Difficulty, GeneratedContent, UploadedFile};
use crate::{CardsmithError, Result};

/// Default base URL of the generation service.
pub const DEFAULT_BASE_URL: &str = "https://generate.cardsmith.app";

/// Default per-call timeout. Generation of a long document takes minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Error bodies are cut to this many characters before they reach logs.
const MAX_ERROR_BODY: usize = 512;

/// Client for the generation service.
#[derive(Clone)]
pub struct HttpGenerationClient {
    api_key: Option<String>,
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpGenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerationClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpGenerationClient {
    /// Create a client for the default service URL.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom base URL and per-call timeout.
    pub fn with_timeout(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CardsmithError::Configuration(format!("HTTP client: {e}")))?;
        let base_url: String = base_url.into();

        Ok(Self {
            api_key,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn form(
        file: &UploadedFile,
        language: &str,
        content_types: &BTreeSet<ContentType>,
        difficulty: Difficulty,
    ) -> Form {
        let types = content_types
            .iter()
            .map(ContentType::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let part = Part::bytes(file.bytes.clone()).file_name(file.filename.clone());

        Form::new()
            .part("file", part)
            .text("language", language.to_string())
            .text("difficulty", difficulty.as_str())
            .text("content_types", types)
    }

    async fn error_for(&self, response: reqwest::Response) -> CardsmithError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("generation service returned {status}")
        } else {
            body.chars().take(MAX_ERROR_BODY).collect()
        };
        CardsmithError::Api { status, message }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    #[instrument(
        skip(self, file, content_types),
        fields(filename = %file.filename, size = file.size(), types = content_types.len())
    )]
    async fn generate(
        &self,
        file: &UploadedFile,
        language: &str,
        content_types: &BTreeSet<ContentType>,
        difficulty: Difficulty,
    ) -> Result<GeneratedContent> {
        let url = format!("{}/generate", self.base_url);

        let mut request = self
            .http
            .post(&url)
            .multipart(Self::form(file, language, content_types, difficulty));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CardsmithError::Timeout(self.timeout)
            } else {
                e.into()
            }
        })?;

        if !response.status().is_success() {
            return Err(self.error_for(response).await);
        }

        let bytes = response.bytes().await?;
        let content: GeneratedContent = serde_json::from_slice(&bytes)
            .map_err(|e| CardsmithError::MalformedResponse(e.to_string()))?;

        debug!(
            flashcards = content.flashcard.len(),
            quiz = content.quiz.len(),
            exercises = content.exercise.len(),
            "generation service responded"
        );
        Ok(content)
    }

    fn name(&self) -> &str {
        "http"
    }
}
