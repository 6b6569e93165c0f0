use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::db::models::Viewer;
use crate::error::AppResult;
use crate::state::DbPool;

/// Create a session for a signed-in user. Returns the session token.
pub fn create_session(pool: &DbPool, viewer: &Viewer, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, display_name, token, expires_at) \
         VALUES (?1, ?2, ?3, ?4, datetime('now', ?5))",
        params![
            id,
            viewer.uid,
            viewer.display_name,
            token,
            format!("+{} hours", hours)
        ],
    )?;

    Ok(token)
}

/// The viewer behind an unexpired session token.
pub fn find_session(pool: &DbPool, token: &str) -> AppResult<Option<Viewer>> {
    let conn = pool.get()?;
    let viewer = conn
        .query_row(
            "SELECT user_id, display_name FROM sessions \
             WHERE token = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| Ok(Viewer::new(row.get::<_, String>(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(viewer)
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop expired sessions. Returns how many were removed.
pub fn purge_expired(pool: &DbPool) -> AppResult<usize> {
    let conn = pool.get()?;
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?;
    Ok(removed)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
