//! Results handed back to request handlers.

use std::collections::BTreeSet;

use serde::Serialize;

use super::content::{ContentType, GeneratedContent};
use super::document::DocumentId;

/// Status-polling response surface.
///
/// Serializes with a `status` tag so controllers can forward it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckOutcome {
    /// Generated material is available. `pending_types` lists requested
    /// types still being backfilled; they arrive on a later poll.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<DocumentId>,
        payload: GeneratedContent,
        #[serde(skip_serializing_if = "BTreeSet::is_empty")]
        pending_types: BTreeSet<ContentType>,
    },
    /// Generation is running or scheduled. Try again later.
    Processing {
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<DocumentId>,
        message: String,
    },
    /// Generation failed. The message is safe to show the requester.
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        document_id: Option<DocumentId>,
        message: String,
    },
    /// The owner cancelled processing.
    Cancelled { document_id: DocumentId },
}

impl CheckOutcome {
    pub(crate) fn processing(document_id: Option<DocumentId>) -> Self {
        CheckOutcome::Processing {
            document_id,
            message: "Your document is being processed. Please check back shortly.".into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, CheckOutcome::Done { .. })
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, CheckOutcome::Processing { .. })
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            CheckOutcome::Done { document_id, .. }
            | CheckOutcome::Processing { document_id, .. }
            | CheckOutcome::Failed { document_id, .. } => *document_id,
            CheckOutcome::Cancelled { document_id } => Some(*document_id),
        }
    }

    /// Payload when done, `None` otherwise.
    pub fn payload(&self) -> Option<&GeneratedContent> {
        match self {
            CheckOutcome::Done { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Result of asking for missing content types to be backfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every requested type is already present; nothing was scheduled.
    NothingMissing,
    /// A backfill job was scheduled for these types.
    Scheduled(BTreeSet<ContentType>),
}
