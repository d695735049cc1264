//! Generated study content: content types, per-type item schemas and the
//! payload shape returned by the generation service.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CardsmithError;

/// A category of generated study material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Flashcard,
    Quiz,
    Exercise,
}

impl ContentType {
    /// Every content type, in wire order.
    pub const ALL: [ContentType; 3] = [
        ContentType::Flashcard,
        ContentType::Quiz,
        ContentType::Exercise,
    ];

    /// Wire name (`"flashcard"`, `"quiz"`, `"exercise"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Flashcard => "flashcard",
            ContentType::Quiz => "quiz",
            ContentType::Exercise => "exercise",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CardsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flashcard" | "flashcards" => Ok(ContentType::Flashcard),
            "quiz" | "quizzes" => Ok(ContentType::Quiz),
            "exercise" | "exercises" => Ok(ContentType::Exercise),
            other => Err(CardsmithError::Validation(format!(
                "unknown content type '{other}'"
            ))),
        }
    }
}

/// Requested difficulty of the generated material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = CardsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(CardsmithError::Validation(format!(
                "unknown difficulty '{other}'"
            ))),
        }
    }
}

/// A question/answer card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
    pub difficulty: Difficulty,
}

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer_option: String,
    pub difficulty: Difficulty,
}

/// A free-form exercise (fill-in, matching, short answer...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    /// Exercise kind as named by the generation service.
    #[serde(rename = "type")]
    pub kind: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_text: Option<String>,
    pub answer: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concepts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Vec<String>>,
}

/// One generated item, tagged with its content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contentType", content = "item", rename_all = "lowercase")]
pub enum ContentItem {
    Flashcard(Flashcard),
    Quiz(QuizQuestion),
    Exercise(Exercise),
}

impl ContentItem {
    pub fn content_type(&self) -> ContentType {
        match self {
            ContentItem::Flashcard(_) => ContentType::Flashcard,
            ContentItem::Quiz(_) => ContentType::Quiz,
            ContentItem::Exercise(_) => ContentType::Exercise,
        }
    }
}

/// Generated content keyed by content type.
///
/// Serializes as `{"flashcard": [...], "quiz": [...], "exercise": [...]}`
/// with empty lists omitted. Item order within a type is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flashcard: Vec<Flashcard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quiz: Vec<QuizQuestion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exercise: Vec<Exercise>,
}

impl GeneratedContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild content from tagged items, preserving their order.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = ContentItem>,
    {
        let mut content = Self::new();
        for item in items {
            content.push(item);
        }
        content
    }

    pub fn push(&mut self, item: ContentItem) {
        match item {
            ContentItem::Flashcard(f) => self.flashcard.push(f),
            ContentItem::Quiz(q) => self.quiz.push(q),
            ContentItem::Exercise(e) => self.exercise.push(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flashcard.is_empty() && self.quiz.is_empty() && self.exercise.is_empty()
    }

    /// Number of items of one type.
    pub fn count(&self, content_type: ContentType) -> usize {
        match content_type {
            ContentType::Flashcard => self.flashcard.len(),
            ContentType::Quiz => self.quiz.len(),
            ContentType::Exercise => self.exercise.len(),
        }
    }

    /// Content types with at least one item.
    pub fn content_types(&self) -> BTreeSet<ContentType> {
        ContentType::ALL
            .into_iter()
            .filter(|t| self.count(*t) > 0)
            .collect()
    }

    /// Keep only the given content types.
    pub fn retain_types(mut self, keep: &BTreeSet<ContentType>) -> Self {
        if !keep.contains(&ContentType::Flashcard) {
            self.flashcard.clear();
        }
        if !keep.contains(&ContentType::Quiz) {
            self.quiz.clear();
        }
        if !keep.contains(&ContentType::Exercise) {
            self.exercise.clear();
        }
        self
    }

    /// Add every type from `other` that `self` has no items for.
    ///
    /// Types already present are left untouched, so merging never rewrites
    /// material a caller may already have seen.
    pub fn merge_missing(&mut self, other: GeneratedContent) {
        if self.flashcard.is_empty() {
            self.flashcard = other.flashcard;
        }
        if self.quiz.is_empty() {
            self.quiz = other.quiz;
        }
        if self.exercise.is_empty() {
            self.exercise = other.exercise;
        }
    }

    /// Flatten into tagged items, type by type.
    pub fn into_items(self) -> Vec<ContentItem> {
        self.flashcard
            .into_iter()
            .map(ContentItem::Flashcard)
            .chain(self.quiz.into_iter().map(ContentItem::Quiz))
            .chain(self.exercise.into_iter().map(ContentItem::Exercise))
            .collect()
    }
}
