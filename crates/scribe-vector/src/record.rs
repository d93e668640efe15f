use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One message after the processing pipeline, ready for vector storage.
///
/// `id` is `msg_<message_id>` and is unique within a server collection;
/// re-inserting the same id is a no-op. `document` is the searchable text:
/// message content, link summaries and image descriptions joined by blank
/// lines. `metadata` is flattened to string-valued scalar pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    /// UTC ISO timestamp; the normalizer drops messages without one.
    pub timestamp: String,
}

impl ProcessedRecord {
    pub fn record_id(message_id: &str) -> String {
        format!("msg_{}", message_id)
    }
}
