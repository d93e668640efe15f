use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use scribe_core::types::ServerId;
use scribe_store::ServerConfigStore;

use crate::collection::{Collection, SearchHit};
use crate::embedder::EmbedderRegistry;
use crate::error::Result;
use crate::record::ProcessedRecord;

/// Per-server facade over vector collections.
///
/// Collections live under `<root>/<server_id>/vectors/` and carry the
/// embedding function named by the server's config; a process holds at
/// most one live [`Collection`] per (server, embedding model).
pub struct VectorStore {
    root: PathBuf,
    registry: Arc<EmbedderRegistry>,
    configs: Arc<ServerConfigStore>,
    default_model: String,
    instances: DashMap<String, Arc<Collection>>,
}

impl VectorStore {
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<EmbedderRegistry>,
        configs: Arc<ServerConfigStore>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            configs,
            default_model: default_model.into(),
            instances: DashMap::new(),
        }
    }

    /// Idempotently open the server's collection.
    ///
    /// The embedder named by server config is attached; when it cannot be
    /// constructed the default model is used instead (warned, never fatal).
    pub async fn collection(&self, server: &ServerId) -> Result<Arc<Collection>> {
        let requested = self
            .configs
            .embedding_model_for(server)
            .unwrap_or_else(|| self.default_model.clone());

        let embedder = match self.registry.get(&requested).await {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    server = %server,
                    model = %requested,
                    error = %e,
                    "embedder unavailable, falling back to default"
                );
                self.registry.get(&self.default_model).await?
            }
        };

        let key = format!("{}:{}", server, embedder.model_name());
        if let Some(existing) = self.instances.get(&key) {
            return Ok(Arc::clone(&existing));
        }

        let dir = self.root.join(server.as_str()).join("vectors");
        let collection = Arc::new(Collection::open(&dir, embedder)?);
        let entry = self
            .instances
            .entry(key)
            .or_insert_with(|| Arc::clone(&collection));
        Ok(Arc::clone(&entry))
    }

    /// Batch insert; duplicates are silently accepted.
    pub async fn upsert(&self, server: &ServerId, records: &[ProcessedRecord]) -> Result<usize> {
        self.collection(server).await?.upsert(records).await
    }

    /// Top-`limit` hits for `query_text` against this server's collection.
    /// Records never cross server boundaries.
    pub async fn query(
        &self,
        server: &ServerId,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.collection(server).await?.query(query_text, limit).await
    }

    /// Record count for status reporting; 0 when the collection is empty
    /// or was never created.
    pub async fn count(&self, server: &ServerId) -> Result<u64> {
        self.collection(server).await?.count()
    }
}
