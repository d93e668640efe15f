use std::collections::HashSet;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use scribe_core::types::{FailurePolicy, ServerId};

use crate::error::{Result, StoreError};
use crate::types::ServerConfig;

/// Thread-safe store for per-server configuration.
///
/// Keeps an in-memory set of configured server ids so the hot ingress path
/// can reject unconfigured servers without touching SQLite.
pub struct ServerConfigStore {
    db: Mutex<Connection>,
    configured: Mutex<HashSet<String>>,
}

impl ServerConfigStore {
    /// Wrap an already-open (and `init_db`-initialised) connection and
    /// populate the configured-id set.
    pub fn new(conn: Connection) -> Result<Self> {
        let configured = {
            let mut stmt = conn.prepare("SELECT server_id FROM server_configs")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect::<HashSet<_>>();
            ids
        };
        info!(servers = configured.len(), "server configs loaded");
        Ok(Self {
            db: Mutex::new(conn),
            configured: Mutex::new(configured),
        })
    }

    /// Create or update a server's configuration (setup path).
    pub fn upsert(
        &self,
        server_id: &ServerId,
        on_failure: FailurePolicy,
        embedding_model: Option<&str>,
    ) -> Result<ServerConfig> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO server_configs
             (server_id, on_failure, embedding_model_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(server_id) DO UPDATE SET
                on_failure = excluded.on_failure,
                embedding_model_name = excluded.embedding_model_name,
                updated_at = excluded.updated_at",
            rusqlite::params![
                server_id.as_str(),
                on_failure.to_string(),
                embedding_model,
                now
            ],
        )?;
        drop(db);

        self.configured
            .lock()
            .unwrap()
            .insert(server_id.as_str().to_string());

        // Read back so callers get the stored row including created_at.
        self.get(server_id)?
            .ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Fetch one server's configuration, `None` when the server is not set up.
    pub fn get(&self, server_id: &ServerId) -> Result<Option<ServerConfig>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT server_id, on_failure, embedding_model_name, created_at, updated_at
             FROM server_configs WHERE server_id = ?1",
            rusqlite::params![server_id.as_str()],
            row_to_config,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list(&self) -> Result<Vec<ServerConfig>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT server_id, on_failure, embedding_model_name, created_at, updated_at
             FROM server_configs ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_config)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Lock-free-ish membership check for the ingress path.
    pub fn is_configured(&self, server_id: &ServerId) -> bool {
        self.configured.lock().unwrap().contains(server_id.as_str())
    }

    /// Message-failure policy for a server, falling back to the global default.
    pub fn policy_for(&self, server_id: &ServerId, default: FailurePolicy) -> FailurePolicy {
        match self.get(server_id) {
            Ok(Some(cfg)) => cfg.on_failure,
            _ => default,
        }
    }

    /// Embedding model override for a server, `None` for the global default.
    pub fn embedding_model_for(&self, server_id: &ServerId) -> Option<String> {
        self.get(server_id).ok().flatten()?.embedding_model
    }
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerConfig> {
    let policy_str: String = row.get(1)?;
    Ok(ServerConfig {
        server_id: ServerId(row.get(0)?),
        on_failure: policy_str.parse().unwrap_or_default(),
        embedding_model: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
