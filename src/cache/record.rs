//! Cache records and their status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hasher::IdentityKey;
use crate::types::{DocumentId, GeneratedContent};

/// Status of a cache record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Processing,
    Done,
    Failed,
}

/// One generation attempt for an identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub identity_key: IdentityKey,
    pub status: CacheStatus,
    /// Present only when `status` is `Done`.
    pub result_payload: Option<GeneratedContent>,
    pub linked_document_id: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by the store on every update.
    pub version: u64,
}

impl CacheRecord {
    /// A fresh reservation.
    pub fn processing(identity_key: IdentityKey, now: DateTime<Utc>) -> Self {
        Self {
            identity_key,
            status: CacheStatus::Processing,
            result_payload: None,
            linked_document_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// A fresh reservation taking the place of this record.
    ///
    /// Keeps the version so the store can check nobody else replaced it
    /// first; every other field starts over.
    pub(crate) fn superseded(&self, now: DateTime<Utc>) -> Self {
        Self {
            version: self.version,
            ..Self::processing(self.identity_key.clone(), now)
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CacheStatus::Done
    }
}
