//! Which requested content types a document still lacks, and how to serve
//! the ones it has.

use std::collections::BTreeSet;

use crate::types::{ContentType, GeneratedContent, StoredContentItem};

/// Requested types with no stored items: `requested − existing`.
///
/// An empty result means nothing needs generating.
pub fn missing_types(
    existing: &BTreeSet<ContentType>,
    requested: &BTreeSet<ContentType>,
) -> BTreeSet<ContentType> {
    requested.difference(existing).copied().collect()
}

/// Build a payload from stored items, keeping only requested types.
///
/// Items keep their stored order. The result has the same shape the
/// generation service returns, so callers cannot tell cached material from
/// fresh output. An empty `requested` yields an empty payload.
pub fn format_from_existing(
    items: &[StoredContentItem],
    requested: &BTreeSet<ContentType>,
) -> GeneratedContent {
    GeneratedContent::from_items(
        items
            .iter()
            .filter(|stored| requested.contains(&stored.content_type()))
            .map(|stored| stored.item.clone()),
    )
}
