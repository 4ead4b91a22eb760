//! `chain` — session upsert, message append, and reference linking.
//!
//! This is the write side of the conversation graph. Every message append
//! runs as one `IMMEDIATE` transaction: the write lock is taken before the
//! tail is read, so two concurrent appends to the same session serialise
//! instead of both linking to the same tail. A failure anywhere inside the
//! transaction rolls the whole append back; no orphan message is ever
//! visible to readers.
//!
//! Tail selection uses the per-session `seq` counter, never timestamps.
//! Timestamps are server-assigned and forced strictly increasing within a
//! session (`max(now, tail_ts + 1)`), so sequence order and timestamp order
//! always agree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::error::AppError;

use super::store_core::{
    init_db, micros_to_datetime, now_micros, open_conn, DB_FILENAME, REL_INVOLVES_COMPANY,
    REL_INVOLVES_RISK,
};
pub use super::store_core::{Message, Session};

/// Persistent store of sessions, their message chains, and message-to-entity
/// reference edges.
///
/// Instances hold only the database path; each call opens its own
/// connection, so the store is freely clonable and safe to share across
/// threads.
#[derive(Debug, Clone)]
pub struct ConversationGraph {
    db_path: PathBuf,
}

impl ConversationGraph {
    /// Open (or create) the conversation graph inside `data_dir`.
    ///
    /// Creates the directory and initialises (or validates) the SQLite
    /// schema. Safe to call repeatedly.
    pub fn open(data_dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(data_dir).map_err(|e| {
            AppError::Storage(format!("graph: cannot create {}: {e}", data_dir.display()))
        })?;
        let db_path = data_dir.join(DB_FILENAME);
        init_db(&db_path)?;
        Ok(Self { db_path })
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ── Session store ─────────────────────────────────────────────────────

    /// Upsert a session node by id and return it.
    ///
    /// Idempotent: a second call with the same id returns the existing node
    /// with its original creation time.
    pub fn ensure_session(&self, session_id: &str) -> Result<Session, AppError> {
        if session_id.trim().is_empty() {
            return Err(AppError::InvalidArgument("session id must not be blank".into()));
        }
        let conn = open_conn(&self.db_path)?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?1, ?2)",
            params![session_id, now_micros()],
        )
        .map_err(|e| AppError::Storage(format!("graph: ensure session {session_id}: {e}")))?;

        let created_at: i64 = conn
            .query_row(
                "SELECT created_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Storage(format!("graph: read session {session_id}: {e}")))?;

        Ok(Session {
            id: session_id.to_string(),
            created_at: micros_to_datetime(created_at),
        })
    }

    // ── Message chain writer ──────────────────────────────────────────────

    /// Append one question/answer turn to a session's chain.
    ///
    /// Creates the session if absent, locates the current tail, creates the
    /// new message node and its `NEXT` edge from the tail, all inside a
    /// single `IMMEDIATE` transaction. Returns the stored message.
    ///
    /// A blank question is rejected before any write. A tail that already
    /// has an outgoing `NEXT` edge means the chain is forked or the tail
    /// query raced something it cannot race; that surfaces as
    /// [`AppError::ChainIntegrity`] and the append is abandoned.
    pub fn append_message(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<Message, AppError> {
        if question.trim().is_empty() {
            return Err(AppError::InvalidArgument("question must not be blank".into()));
        }
        if session_id.trim().is_empty() {
            return Err(AppError::InvalidArgument("session id must not be blank".into()));
        }

        let mut conn = open_conn(&self.db_path)?;
        // IMMEDIATE takes the write lock up front: the tail read below is
        // already serialised against every other append.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("graph: begin append tx: {e}")))?;

        tx.execute(
            "INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?1, ?2)",
            params![session_id, now_micros()],
        )
        .map_err(|e| AppError::Storage(format!("graph: ensure session {session_id}: {e}")))?;

        // Current tail = highest sequence number, deterministic regardless of
        // timestamp granularity.
        let tail: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT id, seq, ts_micros FROM messages
                 WHERE session_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("graph: locate tail for {session_id}: {e}")))?;

        let (seq, ts_micros) = match &tail {
            Some((tail_id, tail_seq, tail_ts)) => {
                let has_next: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM next_edges WHERE from_id = ?1)",
                        params![tail_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| {
                        AppError::Storage(format!("graph: check tail edge for {tail_id}: {e}"))
                    })?;
                if has_next {
                    return Err(AppError::ChainIntegrity(format!(
                        "session {session_id}: tail {tail_id} already has an outgoing NEXT edge"
                    )));
                }
                (tail_seq + 1, now_micros().max(tail_ts + 1))
            }
            None => (0, now_micros()),
        };

        let message_id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO messages (id, session_id, seq, ts_micros, question, answer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![message_id, session_id, seq, ts_micros, question, answer],
        )
        .map_err(|e| AppError::Storage(format!("graph: insert message: {e}")))?;

        if let Some((tail_id, _, _)) = &tail {
            tx.execute(
                "INSERT OR IGNORE INTO next_edges (from_id, to_id) VALUES (?1, ?2)",
                params![tail_id, message_id],
            )
            .map_err(|e| AppError::Storage(format!("graph: link {tail_id} -> {message_id}: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit append: {e}")))?;

        debug!(%session_id, %message_id, seq, "message appended");

        Ok(Message {
            id: message_id,
            session_id: session_id.to_string(),
            seq,
            timestamp: micros_to_datetime(ts_micros),
            question: question.to_string(),
            answer: answer.to_string(),
        })
    }

    // ── Reference linker ──────────────────────────────────────────────────

    /// Attach typed reference edges from a message to catalog entities.
    ///
    /// Merge semantics: re-invoking with the same ids creates nothing new.
    /// Ids with no catalog entity are logged and skipped, never fatal — the
    /// answering engine may legitimately claim entities outside the current
    /// catalog. An unknown *message* id is a caller bug and is rejected.
    pub fn link_references(
        &self,
        message_id: &str,
        company_ids: &HashSet<String>,
        risk_ids: &HashSet<String>,
    ) -> Result<(), AppError> {
        let mut conn = open_conn(&self.db_path)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("graph: begin link tx: {e}")))?;

        let message_exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
                params![message_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Storage(format!("graph: check message {message_id}: {e}")))?;
        if !message_exists {
            return Err(AppError::InvalidArgument(format!(
                "unknown message id: {message_id}"
            )));
        }

        for entity_id in company_ids {
            link_one(&tx, message_id, entity_id, REL_INVOLVES_COMPANY)?;
        }
        for entity_id in risk_ids {
            link_one(&tx, message_id, entity_id, REL_INVOLVES_RISK)?;
        }

        tx.commit()
            .map_err(|e| AppError::Storage(format!("graph: commit link: {e}")))?;
        Ok(())
    }
}

/// Create one reference edge, skipping ids the catalog does not know.
fn link_one(
    tx: &Transaction<'_>,
    message_id: &str,
    entity_id: &str,
    rel: &str,
) -> Result<(), AppError> {
    let entity_exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE id = ?1)",
            params![entity_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Storage(format!("graph: check entity {entity_id}: {e}")))?;

    if !entity_exists {
        warn!(%message_id, %entity_id, rel, "skipping reference to unknown entity");
        return Ok(());
    }

    tx.execute(
        "INSERT OR IGNORE INTO mentions (message_id, entity_id, rel) VALUES (?1, ?2, ?3)",
        params![message_id, entity_id, rel],
    )
    .map_err(|e| AppError::Storage(format!("graph: mention {message_id} -> {entity_id}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::entities::{EntityCatalog, EntityKind, EntityRecord};
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn make_graph() -> (TempDir, ConversationGraph) {
        let temp = TempDir::new().expect("tempdir");
        let graph = ConversationGraph::open(temp.path()).expect("open graph");
        (temp, graph)
    }

    fn raw_conn(graph: &ConversationGraph) -> Connection {
        Connection::open(graph.db_path()).expect("raw connection")
    }

    #[test]
    fn ensure_session_is_idempotent() {
        let (_temp, graph) = make_graph();
        let first = graph.ensure_session("s1").unwrap();
        let second = graph.ensure_session("s1").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let conn = raw_conn(&graph);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions WHERE id = 's1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn blank_session_id_rejected() {
        let (_temp, graph) = make_graph();
        assert!(matches!(
            graph.ensure_session("  "),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn first_append_creates_session_and_seq_zero() {
        let (_temp, graph) = make_graph();
        let m = graph.append_message("s1", "Q1", "A1").unwrap();
        assert_eq!(m.seq, 0);
        assert_eq!(m.session_id, "s1");

        let conn = raw_conn(&graph);
        let sessions: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sessions, 1);
        // First message has no NEXT edge in either direction.
        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM next_edges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[test]
    fn second_append_links_tail_to_new_message() {
        let (_temp, graph) = make_graph();
        let m1 = graph.append_message("s1", "Q1", "A1").unwrap();
        let m2 = graph.append_message("s1", "Q2", "A2").unwrap();
        assert_eq!(m2.seq, 1);
        assert!(m2.timestamp > m1.timestamp, "timestamps strictly increase");

        let conn = raw_conn(&graph);
        let (from, to): (String, String) = conn
            .query_row("SELECT from_id, to_id FROM next_edges", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(from, m1.id);
        assert_eq!(to, m2.id);
    }

    #[test]
    fn sessions_are_independent_chains() {
        let (_temp, graph) = make_graph();
        graph.append_message("s1", "Q1", "A1").unwrap();
        let other = graph.append_message("s2", "Q1", "A1").unwrap();
        assert_eq!(other.seq, 0, "each session counts from zero");
    }

    #[test]
    fn blank_question_rejected_before_write() {
        let (_temp, graph) = make_graph();
        let err = graph.append_message("s1", "   ", "A").unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let conn = raw_conn(&graph);
        let sessions: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sessions, 0, "rejection must precede any write");
    }

    #[test]
    fn link_references_is_idempotent() {
        let (temp, graph) = make_graph();
        let catalog = EntityCatalog::open(temp.path()).unwrap();
        catalog
            .insert(&EntityRecord {
                id: "co-apple".into(),
                name: "Apple".into(),
                kind: EntityKind::Company,
            })
            .unwrap();

        let m = graph.append_message("s1", "Q1", "A1").unwrap();
        let companies: HashSet<String> = ["co-apple".to_string()].into();
        let risks = HashSet::new();

        graph.link_references(&m.id, &companies, &risks).unwrap();
        graph.link_references(&m.id, &companies, &risks).unwrap();

        let conn = raw_conn(&graph);
        let mentions: i64 = conn
            .query_row("SELECT COUNT(*) FROM mentions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mentions, 1);
    }

    #[test]
    fn unknown_entity_ids_are_skipped_silently() {
        let (_temp, graph) = make_graph();
        let m = graph.append_message("s1", "Q1", "A1").unwrap();
        let companies: HashSet<String> = ["co-does-not-exist".to_string()].into();

        graph
            .link_references(&m.id, &companies, &HashSet::new())
            .expect("unknown ids must not fail the call");

        let conn = raw_conn(&graph);
        let mentions: i64 = conn
            .query_row("SELECT COUNT(*) FROM mentions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mentions, 0);
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        let (_temp, graph) = make_graph();
        let err = graph
            .link_references("m-missing", &HashSet::new(), &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }
}
