//! Backing store seam for cache records.

use async_trait::async_trait;

use super::record::CacheRecord;
use crate::Result;
use crate::hasher::IdentityKey;

/// Keyed persistence for [`CacheRecord`]s.
///
/// The two write primitives are what makes reservations safe across
/// processes sharing one backend:
///
/// - [`insert_record`](Self::insert_record) is a unique insert. It must
///   fail with [`CardsmithError::Conflict`](crate::CardsmithError::Conflict)
///   when a record for the key already exists (a unique index, `INSERT ...
///   ON CONFLICT DO NOTHING`, or equivalent).
/// - [`update_record`](Self::update_record) is a version check. It must
///   fail with `Conflict` when the stored version differs from
///   `record.version`, and store the record with the version incremented.
///
/// [`MemoryStore`](crate::store::MemoryStore) is the in-process
/// implementation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the record for a key.
    async fn get_record(&self, key: &IdentityKey) -> Result<Option<CacheRecord>>;

    /// Insert a new record. `Conflict` if one exists.
    async fn insert_record(&self, record: CacheRecord) -> Result<CacheRecord>;

    /// Replace a record, checking its version. Returns the stored record.
    async fn update_record(&self, record: CacheRecord) -> Result<CacheRecord>;

    /// Delete a record. Returns whether one existed.
    async fn delete_record(&self, key: &IdentityKey) -> Result<bool>;
}
