//! Content identity: stable digests for files, type sets and cache keys.
//!
//! All digests are lowercase hex SHA-256, so identity keys survive process
//! restarts and agree across machines. Nothing here uses `DefaultHasher`,
//! whose output is only stable within one process.
//!
//! # Identity scheme
//!
//! Cache records are keyed by `(file digest, language, difficulty)` alone.
//! Requested content types are tracked per document instead of being folded
//! into the key, which is what lets a later request for more types reuse
//! the earlier generation and backfill only what is missing.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{ContentType, Difficulty};

/// Read buffer for [`hash_reader`].
const READ_CHUNK: usize = 64 * 1024;

/// SHA-256 of raw bytes as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of everything `reader` yields, read in chunks.
///
/// The only failure mode is an I/O error from the reader.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Order-independent digest of a content-type list.
///
/// Names are sorted lexicographically and deduplicated, serialized as a
/// canonical JSON array, then hashed. `[quiz, flashcard]` and
/// `[flashcard, quiz]` produce the same digest.
pub fn normalize_type_set<'a, I>(types: I) -> String
where
    I: IntoIterator<Item = &'a ContentType>,
{
    let names: BTreeSet<&'static str> = types.into_iter().map(|t| t.as_str()).collect();
    let names: Vec<&str> = names.into_iter().collect();
    // Serializing a Vec<&str> cannot fail.
    let canonical = serde_json::to_string(&names).unwrap_or_default();
    hash_bytes(canonical.as_bytes())
}

/// Cache identity of a generation: file content, language and difficulty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the key from a file digest (see [`hash_bytes`]) and the
    /// generation parameters. The language is case-folded.
    pub fn derive(file_hash: &str, language: &str, difficulty: Difficulty) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(language.trim().to_lowercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(difficulty.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Derive the key straight from file bytes.
    pub fn for_file(bytes: &[u8], language: &str, difficulty: Difficulty) -> Self {
        Self::derive(&hash_bytes(bytes), language, difficulty)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
