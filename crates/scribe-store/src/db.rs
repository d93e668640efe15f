use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// Open the shared database under the storage root, creating the directory
/// and schema as needed.
pub fn open_shared(root: &Path) -> Result<Connection> {
    std::fs::create_dir_all(root)?;
    let conn = Connection::open(root.join("scribe.db"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise shared tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_server_configs_table(conn)?;
    create_conversations_table(conn)?;
    Ok(())
}

fn create_server_configs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS server_configs (
            server_id            TEXT PRIMARY KEY,
            on_failure           TEXT NOT NULL DEFAULT 'skip',
            embedding_model_name TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            server_id   TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            session_tag TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_user_server
            ON conversations(user_id, server_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conv_created
            ON conversations(created_at);",
    )?;
    Ok(())
}
