//! SQLite-backed implementation of `SupportRepository`, plus the
//! administrative queries used by the CLI (FAQ management, escalation
//! queue, session listing).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use helpline_core::error::{HelplineError, Result};
use helpline_core::repository::SupportRepository;
use helpline_core::types::{
    ConversationTurn, EscalationRecord, EscalationStatus, FaqEntry, FaqUpdate, NewFaq, Session,
    SessionStatus, TurnRole,
};

use crate::db::Database;

const SESSION_COLUMNS: &str = "id, user_id, status, summary, created_at, updated_at";
const TURN_COLUMNS: &str = "id, session_id, role, content, timestamp, confidence";
const ESCALATION_COLUMNS: &str = "id, session_id, reason, status, created_at, resolved_at";
const FAQ_COLUMNS: &str = "id, question, answer, category, embedding, embedding_model";

/// Repository over the Helpline SQLite schema.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    db: Arc<Database>,
}

impl SqliteRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Repository over a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// List sessions, newest first, optionally filtered by status.
    pub fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Session>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3",
                SESSION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![status.map(|s| s.as_str()), limit, offset],
                    |row| Ok(row_to_session(row)),
                )
                .map_err(storage_err)?;
            collect_rows(rows)
        })
    }

    /// Delete a session together with its turns and escalations.
    pub fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM sessions WHERE id = ?1",
                    rusqlite::params![session_id.to_string()],
                )
                .map_err(|e| HelplineError::Storage(format!("Failed to delete session: {}", e)))?;
            if affected == 0 {
                return Err(HelplineError::SessionNotFound(session_id));
            }
            Ok(())
        })
    }

    // =========================================================================
    // FAQs
    // =========================================================================

    /// Insert a new FAQ entry without an embedding.
    pub fn insert_faq(&self, faq: &NewFaq) -> Result<FaqEntry> {
        self.db.with_conn(|conn| insert_faq_row(conn, faq))
    }

    /// Insert a batch of FAQs in one transaction, optionally replacing the
    /// existing set. Either every entry lands or none do.
    pub fn import_faqs(&self, faqs: &[NewFaq], replace: bool) -> Result<Vec<FaqEntry>> {
        self.db.with_tx(|conn| {
            if replace {
                conn.execute("DELETE FROM faqs", [])
                    .map_err(|e| HelplineError::Storage(format!("Failed to clear FAQs: {}", e)))?;
            }
            faqs.iter().map(|faq| insert_faq_row(conn, faq)).collect()
        })
    }

    pub fn get_faq(&self, faq_id: i64) -> Result<Option<FaqEntry>> {
        self.db.with_conn(|conn| find_faq(conn, faq_id))
    }

    /// List FAQ entries by id, optionally filtered by category.
    pub fn list_faqs(
        &self,
        category: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<FaqEntry>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM faqs
                 WHERE (?1 IS NULL OR category = ?1)
                 ORDER BY id ASC
                 LIMIT ?2 OFFSET ?3",
                FAQ_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![category, limit, offset], |row| {
                    Ok(row_to_faq(row))
                })
                .map_err(storage_err)?;
            collect_rows(rows)
        })
    }

    /// Apply a partial update.
    ///
    /// The stored embedding is cleared when the question or answer text
    /// changes, so the next index sync re-embeds the entry.
    pub fn update_faq(&self, faq_id: i64, update: &FaqUpdate) -> Result<FaqEntry> {
        self.db.with_conn(|conn| {
            let mut faq = find_faq(conn, faq_id)?.ok_or(HelplineError::FaqNotFound(faq_id))?;

            let mut text_changed = false;
            if let Some(question) = &update.question {
                text_changed |= *question != faq.question;
                faq.question = question.clone();
            }
            if let Some(answer) = &update.answer {
                text_changed |= *answer != faq.answer;
                faq.answer = answer.clone();
            }
            if let Some(category) = &update.category {
                faq.category = Some(category.clone());
            }
            if text_changed {
                faq.embedding = None;
                faq.embedding_model = None;
            }

            conn.execute(
                "UPDATE faqs SET question = ?1, answer = ?2, category = ?3, embedding = ?4,
                 embedding_model = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    faq.question,
                    faq.answer,
                    faq.category,
                    faq.embedding.as_deref().map(encode_embedding),
                    faq.embedding_model,
                    faq_id,
                ],
            )
            .map_err(|e| HelplineError::Storage(format!("Failed to update FAQ: {}", e)))?;
            Ok(faq)
        })
    }

    pub fn delete_faq(&self, faq_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute("DELETE FROM faqs WHERE id = ?1", rusqlite::params![faq_id])
                .map_err(|e| HelplineError::Storage(format!("Failed to delete FAQ: {}", e)))?;
            if affected == 0 {
                return Err(HelplineError::FaqNotFound(faq_id));
            }
            Ok(())
        })
    }

    /// Drop every stored FAQ vector so the next sync re-embeds all entries.
    /// Returns how many vectors were cleared.
    pub fn clear_faq_embeddings(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE faqs SET embedding = NULL, embedding_model = NULL
                 WHERE embedding IS NOT NULL",
                [],
            )
            .map_err(|e| HelplineError::Storage(format!("Failed to clear embeddings: {}", e)))
        })
    }

    /// Delete every FAQ entry. Returns how many were removed.
    pub fn clear_faqs(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM faqs", [])
                .map_err(|e| HelplineError::Storage(format!("Failed to clear FAQs: {}", e)))
        })
    }

    // =========================================================================
    // Escalations
    // =========================================================================

    pub fn get_escalation(&self, escalation_id: Uuid) -> Result<Option<EscalationRecord>> {
        self.db.with_conn(|conn| find_escalation(conn, escalation_id))
    }

    /// List escalations, newest first, optionally filtered by status.
    pub fn list_escalations(
        &self,
        status: Option<EscalationStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<EscalationRecord>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM escalations
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
                ESCALATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![status.map(|s| s.as_str()), limit, offset],
                    |row| Ok(row_to_escalation(row)),
                )
                .map_err(storage_err)?;
            collect_rows(rows)
        })
    }

    /// Mark a pending escalation as handled by a human agent.
    pub fn resolve_escalation(&self, escalation_id: Uuid) -> Result<EscalationRecord> {
        self.close_escalation(escalation_id, EscalationStatus::Resolved)
    }

    /// Withdraw a pending escalation raised by mistake.
    pub fn cancel_escalation(&self, escalation_id: Uuid) -> Result<EscalationRecord> {
        self.close_escalation(escalation_id, EscalationStatus::Cancelled)
    }

    fn close_escalation(
        &self,
        escalation_id: Uuid,
        status: EscalationStatus,
    ) -> Result<EscalationRecord> {
        self.db.with_conn(|conn| {
            let mut record = find_escalation(conn, escalation_id)?
                .ok_or(HelplineError::EscalationNotFound(escalation_id))?;
            if record.status != EscalationStatus::Pending {
                return Err(HelplineError::EscalationClosed {
                    id: escalation_id,
                    status: record.status,
                });
            }

            let now = Utc::now();
            conn.execute(
                "UPDATE escalations SET status = ?1, resolved_at = ?2 WHERE id = ?3",
                rusqlite::params![
                    status.as_str(),
                    now.timestamp_millis(),
                    escalation_id.to_string()
                ],
            )
            .map_err(|e| HelplineError::Storage(format!("Failed to update escalation: {}", e)))?;

            record.status = status;
            record.resolved_at = Some(now);
            Ok(record)
        })
    }
}

impl SupportRepository for SqliteRepository {
    fn create_session(&self, user_id: Option<&str>) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.map(str::to_string),
            status: SessionStatus::Active,
            summary: None,
            created_at: now,
            updated_at: now,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    session.id.to_string(),
                    session.user_id,
                    session.status.as_str(),
                    now.timestamp_millis(),
                    now.timestamp_millis(),
                ],
            )
            .map_err(|e| HelplineError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })?;
        Ok(session)
    }

    fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.db.with_conn(|conn| find_session(conn, session_id))
    }

    fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<Session> {
        self.db
            .with_conn(|conn| update_session_status(conn, session_id, status))
    }

    fn set_session_summary(&self, session_id: Uuid, summary: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE sessions SET summary = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![
                        summary,
                        Utc::now().timestamp_millis(),
                        session_id.to_string()
                    ],
                )
                .map_err(|e| HelplineError::Storage(format!("Failed to update session: {}", e)))?;
            if affected == 0 {
                return Err(HelplineError::SessionNotFound(session_id));
            }
            Ok(())
        })
    }

    fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
        confidence: Option<f64>,
    ) -> Result<ConversationTurn> {
        self.db.with_conn(|conn| {
            if find_session(conn, session_id)?.is_none() {
                return Err(HelplineError::SessionNotFound(session_id));
            }

            let (last_seq, last_ts): (i64, Option<i64>) = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0), MAX(timestamp) FROM messages
                     WHERE session_id = ?1",
                    rusqlite::params![session_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage_err)?;

            // Never step backwards, even if the wall clock does.
            let now_ms = Utc::now().timestamp_millis();
            let ts_ms = last_ts.map_or(now_ms, |last| last.max(now_ms));
            let turn = ConversationTurn {
                id: Uuid::new_v4(),
                session_id,
                role,
                content: content.to_string(),
                timestamp: millis_to_datetime(ts_ms)?,
                confidence,
            };

            conn.execute(
                "INSERT INTO messages (id, session_id, seq, role, content, timestamp, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    turn.id.to_string(),
                    session_id.to_string(),
                    last_seq + 1,
                    role.as_str(),
                    content,
                    ts_ms,
                    confidence,
                ],
            )
            .map_err(|e| HelplineError::Storage(format!("Failed to append turn: {}", e)))?;

            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ts_ms, session_id.to_string()],
            )
            .map_err(storage_err)?;

            Ok(turn)
        })
    }

    fn recent_turns(&self, session_id: Uuid, limit: usize) -> Result<Vec<ConversationTurn>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE session_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT ?2",
                TURN_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![session_id.to_string(), limit as i64],
                    |row| Ok(row_to_turn(row)),
                )
                .map_err(storage_err)?;
            let mut turns = collect_rows(rows)?;
            turns.reverse();
            Ok(turns)
        })
    }

    fn user_turns(&self, session_id: Uuid) -> Result<Vec<ConversationTurn>> {
        self.turns_where(session_id, Some(TurnRole::User))
    }

    fn all_turns(&self, session_id: Uuid) -> Result<Vec<ConversationTurn>> {
        self.turns_where(session_id, None)
    }

    fn faq_entries(&self) -> Result<Vec<FaqEntry>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM faqs ORDER BY id ASC", FAQ_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| Ok(row_to_faq(row)))
                .map_err(storage_err)?;
            collect_rows(rows)
        })
    }

    fn store_faq_embedding(&self, faq_id: i64, model: &str, embedding: &[f32]) -> Result<()> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE faqs SET embedding = ?1, embedding_model = ?2 WHERE id = ?3",
                    rusqlite::params![encode_embedding(embedding), model, faq_id],
                )
                .map_err(|e| HelplineError::Storage(format!("Failed to store embedding: {}", e)))?;
            if affected == 0 {
                return Err(HelplineError::FaqNotFound(faq_id));
            }
            Ok(())
        })
    }

    fn mark_escalated(&self, session_id: Uuid) -> Result<()> {
        self.set_session_status(session_id, SessionStatus::Escalated)
            .map(|_| ())
    }

    fn create_escalation(&self, session_id: Uuid, reason: &str) -> Result<EscalationRecord> {
        self.db
            .with_conn(|conn| insert_escalation(conn, session_id, reason))
    }

    fn escalate(&self, session_id: Uuid, reason: &str) -> Result<EscalationRecord> {
        self.db.with_tx(|conn| {
            let record = insert_escalation(conn, session_id, reason)?;
            update_session_status(conn, session_id, SessionStatus::Escalated)?;
            Ok(record)
        })
    }
}

impl SqliteRepository {
    fn turns_where(
        &self,
        session_id: Uuid,
        role: Option<TurnRole>,
    ) -> Result<Vec<ConversationTurn>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE session_id = ?1 AND (?2 IS NULL OR role = ?2)
                 ORDER BY timestamp ASC, seq ASC",
                TURN_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![session_id.to_string(), role.map(|r| r.as_str())],
                    |row| Ok(row_to_turn(row)),
                )
                .map_err(storage_err)?;
            collect_rows(rows)
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn storage_err(e: rusqlite::Error) -> HelplineError {
    HelplineError::Storage(e.to_string())
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<Result<T>>>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(storage_err)??);
    }
    Ok(out)
}

fn find_session(conn: &Connection, session_id: Uuid) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    let result = conn
        .query_row(&sql, rusqlite::params![session_id.to_string()], |row| {
            Ok(row_to_session(row))
        })
        .optional()
        .map_err(storage_err)?;
    result.transpose()
}

fn update_session_status(
    conn: &Connection,
    session_id: Uuid,
    status: SessionStatus,
) -> Result<Session> {
    let mut session =
        find_session(conn, session_id)?.ok_or(HelplineError::SessionNotFound(session_id))?;
    session.status = session.status.transition(status)?;
    session.updated_at = Utc::now();

    conn.execute(
        "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![
            session.status.as_str(),
            session.updated_at.timestamp_millis(),
            session_id.to_string()
        ],
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to update session: {}", e)))?;
    Ok(session)
}

fn insert_escalation(conn: &Connection, session_id: Uuid, reason: &str) -> Result<EscalationRecord> {
    if find_session(conn, session_id)?.is_none() {
        return Err(HelplineError::SessionNotFound(session_id));
    }
    let record = EscalationRecord {
        id: Uuid::new_v4(),
        session_id,
        reason: reason.to_string(),
        status: EscalationStatus::Pending,
        created_at: Utc::now(),
        resolved_at: None,
    };
    conn.execute(
        "INSERT INTO escalations (id, session_id, reason, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            record.id.to_string(),
            session_id.to_string(),
            record.reason,
            record.status.as_str(),
            record.created_at.timestamp_millis(),
        ],
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to create escalation: {}", e)))?;
    Ok(record)
}

fn insert_faq_row(conn: &Connection, faq: &NewFaq) -> Result<FaqEntry> {
    if faq.question.trim().is_empty() || faq.answer.trim().is_empty() {
        return Err(HelplineError::Storage(
            "FAQ question and answer must not be empty".to_string(),
        ));
    }
    conn.execute(
        "INSERT INTO faqs (question, answer, category) VALUES (?1, ?2, ?3)",
        rusqlite::params![faq.question, faq.answer, faq.category],
    )
    .map_err(|e| HelplineError::Storage(format!("Failed to insert FAQ: {}", e)))?;
    Ok(FaqEntry {
        id: conn.last_insert_rowid(),
        question: faq.question.clone(),
        answer: faq.answer.clone(),
        category: faq.category.clone(),
        embedding: None,
        embedding_model: None,
    })
}

fn find_faq(conn: &Connection, faq_id: i64) -> Result<Option<FaqEntry>> {
    let sql = format!("SELECT {} FROM faqs WHERE id = ?1", FAQ_COLUMNS);
    let result = conn
        .query_row(&sql, rusqlite::params![faq_id], |row| Ok(row_to_faq(row)))
        .optional()
        .map_err(storage_err)?;
    result.transpose()
}

fn find_escalation(conn: &Connection, escalation_id: Uuid) -> Result<Option<EscalationRecord>> {
    let sql = format!("SELECT {} FROM escalations WHERE id = ?1", ESCALATION_COLUMNS);
    let result = conn
        .query_row(&sql, rusqlite::params![escalation_id.to_string()], |row| {
            Ok(row_to_escalation(row))
        })
        .optional()
        .map_err(storage_err)?;
    result.transpose()
}

fn row_to_session(row: &Row<'_>) -> Result<Session> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(2).map_err(storage_err)?;
    Ok(Session {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(storage_err)?,
        status: status.parse()?,
        summary: row.get(3).map_err(storage_err)?,
        created_at: millis_to_datetime(row.get(4).map_err(storage_err)?)?,
        updated_at: millis_to_datetime(row.get(5).map_err(storage_err)?)?,
    })
}

fn row_to_turn(row: &Row<'_>) -> Result<ConversationTurn> {
    let id: String = row.get(0).map_err(storage_err)?;
    let session_id: String = row.get(1).map_err(storage_err)?;
    let role: String = row.get(2).map_err(storage_err)?;
    Ok(ConversationTurn {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        role: role.parse()?,
        content: row.get(3).map_err(storage_err)?,
        timestamp: millis_to_datetime(row.get(4).map_err(storage_err)?)?,
        confidence: row.get(5).map_err(storage_err)?,
    })
}

fn row_to_escalation(row: &Row<'_>) -> Result<EscalationRecord> {
    let id: String = row.get(0).map_err(storage_err)?;
    let session_id: String = row.get(1).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let resolved_at: Option<i64> = row.get(5).map_err(storage_err)?;
    Ok(EscalationRecord {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        reason: row.get(2).map_err(storage_err)?,
        status: status.parse()?,
        created_at: millis_to_datetime(row.get(4).map_err(storage_err)?)?,
        resolved_at: resolved_at.map(millis_to_datetime).transpose()?,
    })
}

fn row_to_faq(row: &Row<'_>) -> Result<FaqEntry> {
    let embedding: Option<Vec<u8>> = row.get(4).map_err(storage_err)?;
    Ok(FaqEntry {
        id: row.get(0).map_err(storage_err)?,
        question: row.get(1).map_err(storage_err)?,
        answer: row.get(2).map_err(storage_err)?,
        category: row.get(3).map_err(storage_err)?,
        embedding: embedding.as_deref().map(decode_embedding).transpose()?,
        embedding_model: row.get(5).map_err(storage_err)?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| HelplineError::Storage(format!("Invalid UUID '{}': {}", s, e)))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| HelplineError::Storage(format!("Invalid timestamp: {}", ms)))
}

/// Little-endian f32 packing for the `faqs.embedding` BLOB.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(HelplineError::Storage(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
