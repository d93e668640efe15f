//! Resumption Store: derives each server's ingest checkpoint from its
//! vector collection. The store never fails: anything unexpected maps to
//! `NeedsFull`, which at worst re-fetches history the collection will
//! deduplicate anyway.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

use scribe_core::types::ServerId;
use scribe_vector::VectorStore;

/// Where a server's index stands, as derived from its collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    /// No collection on disk yet.
    None,
    /// Collection exists but is empty or unreadable; refetch everything.
    NeedsFull,
    /// Index has data; resume from `last_indexed`.
    Resumable {
        last_indexed: DateTime<Utc>,
        count: u64,
    },
    /// Nothing changed since the previous status call.
    UpToDate {
        last_indexed: DateTime<Utc>,
        count: u64,
    },
}

impl IndexStatus {
    /// The exclusive lower bound to resume fetching from, when one exists.
    pub fn resume_from(&self) -> Option<DateTime<Utc>> {
        match self {
            IndexStatus::Resumable { last_indexed, .. }
            | IndexStatus::UpToDate { last_indexed, .. } => Some(*last_indexed),
            _ => None,
        }
    }
}

pub struct ResumptionStore {
    vectors: Arc<VectorStore>,
    /// Snapshot from the previous status call: (count, max timestamp).
    last_seen: DashMap<String, (u64, String)>,
}

impl ResumptionStore {
    pub fn new(vectors: Arc<VectorStore>) -> Self {
        Self {
            vectors,
            last_seen: DashMap::new(),
        }
    }

    /// Compute the server's index status. Never returns an error.
    pub async fn status(&self, server: &ServerId) -> IndexStatus {
        let collection = match self.vectors.collection(server).await {
            Ok(c) => c,
            Err(e) => {
                warn!(server = %server, error = %e, "collection unavailable, treating as needs-full");
                return IndexStatus::NeedsFull;
            }
        };

        let count = match collection.count() {
            Ok(0) => return IndexStatus::None,
            Ok(n) => n,
            Err(e) => {
                warn!(server = %server, error = %e, "count failed, treating as needs-full");
                return IndexStatus::NeedsFull;
            }
        };

        let raw_ts = match collection.max_timestamp() {
            Ok(Some(ts)) => ts,
            Ok(None) => return IndexStatus::NeedsFull,
            Err(e) => {
                warn!(server = %server, error = %e, "max timestamp failed, treating as needs-full");
                return IndexStatus::NeedsFull;
            }
        };

        let Some(last_indexed) = parse_ts(&raw_ts) else {
            warn!(server = %server, ts = %raw_ts, "corrupt checkpoint timestamp, treating as needs-full");
            return IndexStatus::NeedsFull;
        };

        let key = server.as_str().to_string();
        let unchanged = self
            .last_seen
            .get(&key)
            .is_some_and(|prev| *prev == (count, raw_ts.clone()));
        self.last_seen.insert(key, (count, raw_ts));

        if unchanged {
            IndexStatus::UpToDate {
                last_indexed,
                count,
            }
        } else {
            IndexStatus::Resumable {
                last_indexed,
                count,
            }
        }
    }

    /// Forget the cached snapshot (e.g. after an explicit purge).
    pub fn invalidate(&self, server: &ServerId) {
        self.last_seen.remove(server.as_str());
    }
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
