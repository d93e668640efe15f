use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{Result, VectorError};
use crate::record::ProcessedRecord;
use crate::vec_ext::{ensure_sqlite_vec_registered, vector_blob};

/// One hit from [`Collection::query`], best first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    /// `1 − cosine distance`, rounded to 3 decimals.
    pub score: f64,
}

/// A server-scoped set of processed records with an attached embedding
/// function, persisted as a sqlite-vec database.
///
/// The vector table's dimension is bound lazily by the first stored
/// embedding; until then queries return no hits.
pub struct Collection {
    conn: Mutex<Connection>,
    embedder: Arc<Embedder>,
}

impl Collection {
    /// Open (creating if needed) the collection rooted at `dir`.
    pub fn open(dir: &Path, embedder: Arc<Embedder>) -> Result<Self> {
        ensure_sqlite_vec_registered();
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("messages.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id        TEXT PRIMARY KEY,
                document  TEXT NOT NULL,
                metadata  TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_ts ON records(timestamp);
            CREATE TABLE IF NOT EXISTS collection_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Batch insert by id. Duplicate ids are silently accepted; only new
    /// records are embedded and stored, so re-delivery is idempotent.
    pub async fn upsert(&self, records: &[ProcessedRecord]) -> Result<usize> {
        // Pass 1 (short lock): find which ids are new.
        let fresh: Vec<&ProcessedRecord> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT 1 FROM records WHERE id = ?1")?;
            records
                .iter()
                .filter(|r| !matches!(stmt.exists([&r.id]), Ok(true)))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        // Embed outside the lock; inference is the slow part.
        let documents: Vec<String> = fresh.iter().map(|r| r.document.clone()).collect();
        let embeddings = self.embedder.embed(&documents).await?;

        // Pass 2: store rows and vectors in one transaction.
        let mut conn = self.conn.lock().unwrap();
        let dim = match stored_dim(&conn)? {
            Some(d) => d,
            None => {
                let d = embeddings.first().map(|e| e.len()).unwrap_or(0);
                bind_dimension(&conn, d)?;
                d
            }
        };

        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        for (record, embedding) in fresh.iter().zip(embeddings.iter()) {
            if embedding.len() != dim {
                return Err(VectorError::DimensionMismatch {
                    expected: dim,
                    got: embedding.len(),
                });
            }
            let metadata = serde_json::to_string(&record.metadata)
                .unwrap_or_else(|_| "{}".to_string());
            let changed = tx.execute(
                "INSERT INTO records (id, document, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![record.id, record.document, metadata, record.timestamp],
            )?;
            if changed > 0 {
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO vec_records (rowid, embedding) VALUES (?1, ?2)",
                    rusqlite::params![rowid, vector_blob(embedding)],
                )?;
                inserted += 1;
            }
        }
        tx.commit()?;

        debug!(inserted, model = self.embedder.model_name(), "collection upsert");
        Ok(inserted)
    }

    /// Top-`limit` records by relevance to `query_text`, best first.
    pub async fn query(&self, query_text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        {
            let conn = self.conn.lock().unwrap();
            if stored_dim(&conn)?.is_none() {
                return Ok(Vec::new());
            }
        }

        let embeddings = self.embedder.embed(&[query_text.to_string()]).await?;
        let Some(query_vec) = embeddings.first() else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.document, r.metadata, v.distance
             FROM vec_records v
             JOIN records r ON r.rowid = v.rowid
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance",
        )?;
        let hits = stmt
            .query_map(
                rusqlite::params![vector_blob(query_vec), limit as i64],
                |row| {
                    let document: String = row.get(0)?;
                    let metadata_json: String = row.get(1)?;
                    let distance: f64 = row.get(2)?;
                    Ok((document, metadata_json, distance))
                },
            )?
            .filter_map(|r| r.ok())
            .map(|(document, metadata_json, distance)| SearchHit {
                document,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                score: round3(1.0 - distance),
            })
            .collect();
        Ok(hits)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Greatest stored timestamp, `None` for an empty collection.
    pub fn max_timestamp(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<String> =
            conn.query_row("SELECT MAX(timestamp) FROM records", [], |row| row.get(0))?;
        Ok(ts)
    }
}

fn stored_dim(conn: &Connection) -> Result<Option<usize>> {
    match conn.query_row(
        "SELECT value FROM collection_meta WHERE key = 'dim'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(v) => Ok(v.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(VectorError::Storage(e)),
    }
}

/// Create the vector table once the embedding dimension is known.
fn bind_dimension(conn: &Connection, dim: usize) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_records
             USING vec0(embedding float[{dim}] distance_metric=cosine);"
    ))?;
    conn.execute(
        "INSERT INTO collection_meta (key, value) VALUES ('dim', ?1)
         ON CONFLICT(key) DO NOTHING",
        rusqlite::params![dim.to_string()],
    )?;
    Ok(())
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scribe_model::runtime::{
        ChatRequest, ChatResponse, ModelHealth, ModelRuntime, RuntimeError,
    };
    use std::result::Result;

    /// Deterministic letter-frequency embeddings (26 dims).
    struct LetterRuntime;

    fn letter_vec(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.chars().flat_map(|c| c.to_lowercase()) {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }

    #[async_trait]
    impl ModelRuntime for LetterRuntime {
        fn name(&self) -> &str {
            "letters"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
            unimplemented!("not used")
        }
        async fn describe_image(
            &self,
            _model: &str,
            _bytes: &[u8],
            _prompt: &str,
        ) -> Result<String, RuntimeError> {
            unimplemented!("not used")
        }
        async fn embed(
            &self,
            _model: &str,
            documents: &[String],
        ) -> Result<Vec<Vec<f32>>, RuntimeError> {
            Ok(documents.iter().map(|d| letter_vec(d)).collect())
        }
        async fn ensure_available(&self, _model: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn health_check(&self, model: &str) -> Result<ModelHealth, RuntimeError> {
            Ok(ModelHealth {
                model: model.to_string(),
                healthy: true,
                elapsed_ms: 0,
                detail: None,
            })
        }
    }

    fn collection(dir: &Path) -> Collection {
        let embedder = Arc::new(Embedder::new("letters", Arc::new(LetterRuntime)));
        Collection::open(dir, embedder).unwrap()
    }

    fn record(id: &str, document: &str, ts: &str) -> ProcessedRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("message_id".to_string(), id.to_string());
        ProcessedRecord {
            id: ProcessedRecord::record_id(id),
            document: document.to_string(),
            metadata,
            timestamp: ts.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_then_query_ranks_by_relevance() {
        let dir = tempfile::tempdir().unwrap();
        let c = collection(dir.path());

        c.upsert(&[
            record("1", "logs logs logs", "2024-01-01T00:00:00+00:00"),
            record("2", "pizza party", "2024-01-02T00:00:00+00:00"),
        ])
        .await
        .unwrap();

        let hits = c.query("logs", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].document.contains("logs"));
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn duplicate_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let c = collection(dir.path());

        let r = record("1001", "see the logs", "2024-01-01T00:00:00+00:00");
        assert_eq!(c.upsert(std::slice::from_ref(&r)).await.unwrap(), 1);
        assert_eq!(c.upsert(std::slice::from_ref(&r)).await.unwrap(), 0);
        assert_eq!(c.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn max_timestamp_tracks_newest_record() {
        let dir = tempfile::tempdir().unwrap();
        let c = collection(dir.path());
        assert_eq!(c.max_timestamp().unwrap(), None);

        c.upsert(&[
            record("1", "alpha", "2024-01-01T00:00:00+00:00"),
            record("2", "beta", "2024-01-03T00:00:00+00:00"),
            record("3", "gamma", "2024-01-02T00:00:00+00:00"),
        ])
        .await
        .unwrap();

        assert_eq!(
            c.max_timestamp().unwrap().as_deref(),
            Some("2024-01-03T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn query_on_empty_collection_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let c = collection(dir.path());
        assert!(c.query("anything", 5).await.unwrap().is_empty());
    }
}
