use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use scribe_core::types::{ServerId, UserId};

use crate::error::Result;
use crate::types::{ConversationTurn, TurnRole};

/// Terms accepted by [`ConversationLog::search`]; extras are ignored.
const MAX_SEARCH_TERMS: usize = 5;

/// Append-only log of user/assistant turns, indexed by (user, server).
///
/// Every read requires both ids; there is no cross-user or cross-server
/// query surface.
pub struct ConversationLog {
    db: Mutex<Connection>,
}

impl ConversationLog {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    pub fn append(&self, turn: &ConversationTurn) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (user_id, server_id, role, content, session_tag, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                turn.user_id.as_str(),
                turn.server_id.as_str(),
                turn.role.to_string(),
                turn.content,
                turn.session_tag,
                turn.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent turns for (user, server), returned oldest first.
    pub fn history(
        &self,
        user_id: &UserId,
        server_id: &ServerId,
        limit: usize,
        since_days: Option<u32>,
    ) -> Result<Vec<ConversationTurn>> {
        let cutoff = cutoff_for(since_days);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT user_id, server_id, role, content, session_tag, created_at
             FROM conversations
             WHERE user_id = ?1 AND server_id = ?2 AND created_at >= ?3
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), server_id.as_str(), cutoff, limit as i64],
            row_to_turn,
        )?;
        let mut turns: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        turns.reverse();
        Ok(turns)
    }

    /// Substring search over the user's turns with this server.
    /// At most [`MAX_SEARCH_TERMS`] terms are used; a turn matches if it
    /// contains any of them.
    pub fn search(
        &self,
        user_id: &UserId,
        server_id: &ServerId,
        terms: &[String],
        limit: usize,
        since_days: Option<u32>,
    ) -> Result<Vec<ConversationTurn>> {
        let terms: Vec<&String> = terms.iter().take(MAX_SEARCH_TERMS).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = cutoff_for(since_days);

        let mut sql = String::from(
            "SELECT user_id, server_id, role, content, session_tag, created_at
             FROM conversations
             WHERE user_id = ?1 AND server_id = ?2 AND created_at >= ?3 AND (",
        );
        for i in 0..terms.len() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str(&format!("content LIKE ?{}", i + 4));
        }
        sql.push_str(") ORDER BY created_at DESC LIMIT ?");
        sql.push_str(&(terms.len() + 4).to_string());

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(user_id.as_str().to_string()),
            Box::new(server_id.as_str().to_string()),
            Box::new(cutoff),
        ];
        for t in &terms {
            params.push(Box::new(format!("%{}%", t)));
        }
        params.push(Box::new(limit as i64));

        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_turn,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete the user's entire log with this server. Returns rows removed.
    pub fn purge(&self, user_id: &UserId, server_id: &ServerId) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM conversations WHERE user_id = ?1 AND server_id = ?2",
            rusqlite::params![user_id.as_str(), server_id.as_str()],
        )?;
        debug!(user = %user_id, server = %server_id, removed = n, "conversation log purged");
        Ok(n)
    }
}

fn cutoff_for(since_days: Option<u32>) -> String {
    match since_days {
        Some(days) => (chrono::Utc::now() - chrono::Duration::days(i64::from(days))).to_rfc3339(),
        None => String::new(), // compares before every RFC-3339 timestamp
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role_str: String = row.get(2)?;
    Ok(ConversationTurn {
        user_id: UserId(row.get(0)?),
        server_id: ServerId(row.get(1)?),
        role: role_str.parse().unwrap_or(TurnRole::User),
        content: row.get(3)?,
        session_tag: row.get(4)?,
        created_at: row.get(5)?,
    })
}
