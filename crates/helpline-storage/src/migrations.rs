//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use helpline_core::error::HelplineError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), HelplineError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| HelplineError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: faq_embedding_model");
    }

    Ok(())
}

/// Version 1: sessions, messages, escalations, faqs.
///
/// Timestamps are Unix milliseconds. `messages.seq` orders turns that share
/// a timestamp.
fn apply_v1(conn: &Connection) -> Result<(), HelplineError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id          TEXT PRIMARY KEY NOT NULL,
            user_id     TEXT,
            status      TEXT NOT NULL DEFAULT 'active'
                        CHECK (status IN ('active', 'escalated', 'closed')),
            summary     TEXT,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_status
            ON sessions (status, created_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY NOT NULL,
            session_id  TEXT NOT NULL,
            seq         INTEGER NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content     TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            confidence  REAL,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            UNIQUE (session_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session_order
            ON messages (session_id, timestamp DESC, seq DESC);

        CREATE INDEX IF NOT EXISTS idx_messages_session_role
            ON messages (session_id, role);

        CREATE TABLE IF NOT EXISTS escalations (
            id          TEXT PRIMARY KEY NOT NULL,
            session_id  TEXT NOT NULL,
            reason      TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'resolved', 'cancelled')),
            created_at  INTEGER NOT NULL,
            resolved_at INTEGER,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_escalations_status
            ON escalations (status, created_at DESC);

        CREATE TABLE IF NOT EXISTS faqs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            question    TEXT NOT NULL,
            answer      TEXT NOT NULL,
            category    TEXT,
            embedding   BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_faqs_category
            ON faqs (category);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

/// Version 2: record which embedder produced a stored FAQ vector.
///
/// Vectors written before this column existed have no model and are
/// re-embedded on the next sync.
fn apply_v2(conn: &Connection) -> Result<(), HelplineError> {
    conn.execute_batch(
        "
        ALTER TABLE faqs ADD COLUMN embedding_model TEXT;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'faq_embedding_model');
        ",
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to apply migration v2: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_v2_adds_embedding_model_to_existing_faqs() {
        let conn = open_test_conn();
        conn.execute_batch(
            "CREATE TABLE schema_migrations (
                version     INTEGER PRIMARY KEY NOT NULL,
                name        TEXT NOT NULL,
                applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )
        .unwrap();
        apply_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO faqs (question, answer, embedding) VALUES ('q', 'a', x'0000803f')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let model: Option<String> = conn
            .query_row("SELECT embedding_model FROM faqs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(model, None);
    }

    #[test]
    fn test_message_requires_session() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO messages (id, session_id, seq, role, content, timestamp)
             VALUES ('m1', 'missing', 1, 'user', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_role_check_constraint() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES ('s1', 0, 0)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO messages (id, session_id, seq, role, content, timestamp)
             VALUES ('m1', 's1', 1, 'system', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deleting_session_cascades() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES ('s1', 0, 0);
             INSERT INTO messages (id, session_id, seq, role, content, timestamp)
                 VALUES ('m1', 's1', 1, 'user', 'hi', 0);
             INSERT INTO escalations (id, session_id, reason, created_at)
                 VALUES ('e1', 's1', 'why', 0);
             DELETE FROM sessions WHERE id = 's1';",
        )
        .unwrap();

        let messages: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        let escalations: i64 = conn
            .query_row("SELECT COUNT(*) FROM escalations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(messages, 0);
        assert_eq!(escalations, 0);
    }
}
