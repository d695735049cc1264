//! Processing cache: deduplicates generation work by identity key.
//!
//! Every generation attempt owns a [`CacheRecord`] keyed by
//! [`IdentityKey`]. [`ProcessingCache::lookup_or_reserve`] is the single
//! entry point that decides whether a caller generates, waits or reuses:
//!
//! ```text
//!                lookup_or_reserve(key)
//!                         │
//!        ┌───────────┬────┴──────┬───────────────┐
//!        ▼           ▼           ▼               ▼
//!     no record   Processing    Done          Failed
//!        │           │           │      (or lease expired)
//!   insert new   InProgress   Done(rec)          │
//!   Processing                            replace with fresh
//!        │                                  Processing
//!        └──────────► Reserved ◄─────────────────┘
//! ```
//!
//! The reservation holder later calls [`complete`](ProcessingCache::complete)
//! or [`fail`](ProcessingCache::fail). A failed record is never served: the
//! next lookup replaces it, so every request after a failure gets exactly
//! one fresh attempt.
//!
//! # Atomicity
//!
//! Lookup and insert run under a per-key async mutex, so within one process
//! exactly one caller observes `Reserved`. Across processes the store's
//! unique insert and version-checked update decide the race; the loser is
//! told `InProgress` (or `Done` if the winner already finished).
//!
//! # Abandoned reservations
//!
//! A holder that crashes leaves its record `Processing`. With
//! [`CacheConfig::stale_after`] unset (the default) such a record blocks
//! regeneration until removed by hand. Setting it treats older `Processing`
//! records like failed ones.

mod locks;
pub mod record;
pub mod store;

pub use record::{CacheRecord, CacheStatus};
pub use store::CacheStore;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::hasher::IdentityKey;
use crate::telemetry;
use crate::types::{DocumentId, GeneratedContent};
use crate::{CardsmithError, Result};
use locks::KeyLocks;

/// Configuration for the processing cache.
///
/// ```rust
/// # use cardsmith::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new().stale_after(Duration::from_secs(15 * 60));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which a `Processing` record counts as abandoned.
    /// Default: `None` (never).
    pub stale_after: Option<Duration>,
    /// How long an unused per-key lock is kept. Default: 10 minutes.
    pub lock_idle_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: None,
            lock_idle_ttl: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `Processing` records older than `lease` as abandoned.
    pub fn stale_after(mut self, lease: Duration) -> Self {
        self.stale_after = Some(lease);
        self
    }

    /// Set how long unused per-key locks are kept.
    pub fn lock_idle_ttl(mut self, ttl: Duration) -> Self {
        self.lock_idle_ttl = ttl;
        self
    }
}

/// Outcome of [`ProcessingCache::lookup_or_reserve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The caller holds the reservation and must generate, then call
    /// `complete` or `fail`.
    Reserved(CacheRecord),
    /// Another caller is generating. Do not generate; retry later.
    InProgress(CacheRecord),
    /// A finished generation exists.
    Done(CacheRecord),
}

impl Lookup {
    pub fn record(&self) -> &CacheRecord {
        match self {
            Lookup::Reserved(r) | Lookup::InProgress(r) | Lookup::Done(r) => r,
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Lookup::Reserved(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Lookup::Reserved(_) => "reserved",
            Lookup::InProgress(_) => "in_progress",
            Lookup::Done(_) => "done",
        }
    }
}

/// Identity-keyed generation cache with reservation semantics.
pub struct ProcessingCache {
    store: Arc<dyn CacheStore>,
    locks: KeyLocks,
    config: CacheConfig,
}

impl ProcessingCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            locks: KeyLocks::new(config.lock_idle_ttl),
            config,
        }
    }

    /// Read a record without reserving.
    pub async fn get(&self, key: &IdentityKey) -> Result<Option<CacheRecord>> {
        self.store.get_record(key).await
    }

    /// Find, reuse or reserve the record for `key`.
    #[instrument(skip(self), fields(identity_key = key.short()))]
    pub async fn lookup_or_reserve(&self, key: &IdentityKey) -> Result<Lookup> {
        let _guard = self.locks.lock(key).await;
        let now = Utc::now();

        let lookup = match self.store.get_record(key).await? {
            None => match self
                .store
                .insert_record(CacheRecord::processing(key.clone(), now))
                .await
            {
                Ok(record) => Lookup::Reserved(record),
                Err(CardsmithError::Conflict(_)) => self.lost_race(key).await?,
                Err(e) => return Err(e),
            },
            Some(record) => match record.status {
                CacheStatus::Done => Lookup::Done(record),
                CacheStatus::Processing if !self.is_abandoned(&record, now) => {
                    Lookup::InProgress(record)
                }
                status => {
                    if status == CacheStatus::Processing {
                        warn!(
                            created_at = %record.created_at,
                            "reservation exceeded its lease, replacing"
                        );
                    } else {
                        debug!("replacing failed record with a fresh reservation");
                    }
                    match self.store.update_record(record.superseded(now)).await {
                        Ok(fresh) => {
                            metrics::counter!(telemetry::CACHE_REPLACED_TOTAL).increment(1);
                            Lookup::Reserved(fresh)
                        }
                        Err(CardsmithError::Conflict(_)) => self.lost_race(key).await?,
                        Err(e) => return Err(e),
                    }
                }
            },
        };

        metrics::counter!(telemetry::CACHE_LOOKUPS_TOTAL, "outcome" => lookup.label())
            .increment(1);
        debug!(outcome = lookup.label(), "cache lookup");
        Ok(lookup)
    }

    /// Mark the reservation for `key` done with its payload.
    #[instrument(skip(self, payload), fields(identity_key = key.short()))]
    pub async fn complete(&self, key: &IdentityKey, payload: GeneratedContent) -> Result<CacheRecord> {
        let _guard = self.locks.lock(key).await;
        let mut record = self.require_processing(key).await?;
        record.status = CacheStatus::Done;
        record.result_payload = Some(payload);
        record.updated_at = Utc::now();
        self.store.update_record(record).await
    }

    /// Mark the reservation for `key` failed.
    #[instrument(skip(self), fields(identity_key = key.short()))]
    pub async fn fail(&self, key: &IdentityKey) -> Result<CacheRecord> {
        let _guard = self.locks.lock(key).await;
        let mut record = self.require_processing(key).await?;
        record.status = CacheStatus::Failed;
        record.result_payload = None;
        record.updated_at = Utc::now();
        self.store.update_record(record).await
    }

    /// Point the record at the document that holds its generated items.
    pub async fn link_document(&self, key: &IdentityKey, document_id: DocumentId) -> Result<CacheRecord> {
        let _guard = self.locks.lock(key).await;
        let mut record = self
            .store
            .get_record(key)
            .await?
            .ok_or_else(|| CardsmithError::NotFound(format!("cache record {}", key.short())))?;
        record.linked_document_id = Some(document_id);
        record.updated_at = Utc::now();
        self.store.update_record(record).await
    }

    /// Add content types missing from a done record's payload.
    ///
    /// Types the payload already has are kept as they are.
    pub async fn merge_payload(&self, key: &IdentityKey, content: GeneratedContent) -> Result<CacheRecord> {
        let _guard = self.locks.lock(key).await;
        let mut record = self
            .store
            .get_record(key)
            .await?
            .ok_or_else(|| CardsmithError::NotFound(format!("cache record {}", key.short())))?;
        if record.status != CacheStatus::Done {
            return Err(CardsmithError::InvalidState(format!(
                "cannot merge into {:?} record",
                record.status
            )));
        }
        record
            .result_payload
            .get_or_insert_with(GeneratedContent::default)
            .merge_missing(content);
        record.updated_at = Utc::now();
        self.store.update_record(record).await
    }

    /// Delete `record` if it is still the stored version.
    ///
    /// Returns `false` when someone replaced or removed it meanwhile.
    pub async fn invalidate(&self, record: &CacheRecord) -> Result<bool> {
        let key = &record.identity_key;
        let _guard = self.locks.lock(key).await;
        match self.store.get_record(key).await? {
            Some(current) if current.version == record.version => {
                self.store.delete_record(key).await
            }
            _ => Ok(false),
        }
    }

    fn is_abandoned(&self, record: &CacheRecord, now: DateTime<Utc>) -> bool {
        let Some(lease) = self.config.stale_after else {
            return false;
        };
        let age = now.signed_duration_since(record.created_at);
        age.to_std().map(|age| age > lease).unwrap_or(false)
    }

    async fn require_processing(&self, key: &IdentityKey) -> Result<CacheRecord> {
        let record = self
            .store
            .get_record(key)
            .await?
            .ok_or_else(|| CardsmithError::NotFound(format!("cache record {}", key.short())))?;
        if record.status != CacheStatus::Processing {
            return Err(CardsmithError::InvalidState(format!(
                "expected processing record, found {:?}",
                record.status
            )));
        }
        Ok(record)
    }

    /// Another process won the insert or replacement.
    async fn lost_race(&self, key: &IdentityKey) -> Result<Lookup> {
        debug!("reservation lost to a concurrent writer");
        match self.store.get_record(key).await? {
            Some(record) if record.is_done() => Ok(Lookup::Done(record)),
            Some(record) => Ok(Lookup::InProgress(record)),
            None => Err(CardsmithError::Conflict(format!(
                "cache record {} changed during reservation",
                key.short()
            ))),
        }
    }
}
