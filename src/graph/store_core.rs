//! `store_core` — shared schema, connection factory, and types for the
//! conversation graph.
//!
//! Both [`ConversationGraph`](super::chain::ConversationGraph) and
//! [`EntityCatalog`](super::entities::EntityCatalog) operate on the same
//! SQLite database and use these helpers. Nothing here is part of either
//! store's public API; the shared types are re-exported from `graph`.
//!
//! ## What lives here
//! - **Schema constants** — `DB_FILENAME`, `SCHEMA_VERSION`, `init_schema`.
//! - **Connection factory** — `open_conn` (WAL + foreign-keys + busy timeout).
//! - **Utilities** — `now_micros`, `derived_entity_id`.
//! - **Shared public types** — `Session`, `Message`, `SessionCount`,
//!   `MentionCount`, `EntityKind`, `EntityRecord`.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::AppError;

// ── Schema ────────────────────────────────────────────────────────────────────

/// SQLite database file name holding the full conversation graph.
pub(crate) const DB_FILENAME: &str = "conversations.db";

/// Schema version stored in `PRAGMA user_version`.
/// Increment when the DDL changes; add a migration path in `init_db`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// `rel` column value for a message-to-company reference edge.
pub(crate) const REL_INVOLVES_COMPANY: &str = "involves_company";
/// `rel` column value for a message-to-risk-factor reference edge.
pub(crate) const REL_INVOLVES_RISK: &str = "involves_risk";

/// Execute the v1 schema DDL on a freshly-opened SQLite connection.
///
/// Nodes: `sessions`, `messages`, `entities`. Edges: the `session_id` column
/// of `messages` (a message belongs to exactly one session), `next_edges`
/// (the per-session chain), `entity_links` (pre-existing relatedness in the
/// entity catalog), and `mentions` (message-to-entity references).
///
/// Linearity of the chain is enforced structurally: `next_edges` allows at
/// most one outgoing edge per message (`PRIMARY KEY (from_id)`) and at most
/// one inbound edge (`UNIQUE (to_id)`). `UNIQUE (session_id, seq)` on
/// `messages` makes two appends racing for the same tail a constraint
/// violation instead of a forked chain.
///
/// Sets `PRAGMA user_version = 1` so `init_db` can skip the DDL on re-open.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            seq INTEGER NOT NULL,
            ts_micros INTEGER NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            UNIQUE (session_id, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

        CREATE TABLE IF NOT EXISTS next_edges (
            from_id TEXT PRIMARY KEY REFERENCES messages(id),
            to_id TEXT NOT NULL UNIQUE REFERENCES messages(id)
        );

        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_links (
            entity_id TEXT NOT NULL REFERENCES entities(id),
            related_id TEXT NOT NULL REFERENCES entities(id),
            PRIMARY KEY (entity_id, related_id)
        );

        CREATE TABLE IF NOT EXISTS mentions (
            message_id TEXT NOT NULL REFERENCES messages(id),
            entity_id TEXT NOT NULL REFERENCES entities(id),
            rel TEXT NOT NULL,
            PRIMARY KEY (message_id, entity_id)
        );

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| AppError::Storage(format!("graph: initialize schema: {e}")))
}

/// Initialise or validate the schema of the database at `db_path`.
///
/// - `user_version == 0`: fresh DB, run DDL.
/// - `user_version == SCHEMA_VERSION`: already initialised, skip.
/// - Anything else: unsupported version, return an error.
pub(crate) fn init_db(db_path: &Path) -> Result<(), AppError> {
    let conn = open_conn(db_path)?;
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|e| AppError::Storage(format!("graph: read schema version: {e}")))?;

    if version == 0 {
        return init_schema(&conn);
    }
    if version != SCHEMA_VERSION {
        return Err(AppError::Storage(format!(
            "graph: unsupported schema version {version}, expected {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

// ── Connection helper ─────────────────────────────────────────────────────────

/// Open a SQLite connection to `db_path` and apply recommended pragmas.
///
/// Pragmas applied:
/// - `journal_mode = WAL` — allows concurrent readers alongside a writer.
/// - `foreign_keys = ON` — a mention or NEXT edge can never dangle.
/// - `busy_timeout = 5000` — wait up to 5 s before returning `SQLITE_BUSY`,
///   which is what serialises concurrent appends from separate connections.
pub(crate) fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Storage(format!("graph: open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("graph: set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Storage(format!("graph: set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Storage(format!("graph: set busy_timeout: {e}")))?;

    Ok(conn)
}

// ── Utility functions ─────────────────────────────────────────────────────────

/// Current UTC wall-clock time in microseconds since the Unix epoch.
pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Convert a stored microsecond timestamp back to a `DateTime<Utc>`.
/// Out-of-range values clamp to the epoch extremes rather than panicking.
pub(crate) fn micros_to_datetime(ts_micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts_micros).unwrap_or(if ts_micros < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Derive a stable entity id from its kind and name, e.g. `"co-1a2b3c4d5e6f"`.
///
/// Used when seed data does not supply an explicit id, so re-seeding the same
/// catalog always maps a name to the same id.
pub fn derived_entity_id(kind: EntityKind, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.to_lowercase().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", kind.id_prefix(), &digest[..12])
}

// ── Shared public types ───────────────────────────────────────────────────────

/// A conversation session node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    /// Caller-supplied opaque identifier, unique across the store.
    pub id: String,
    /// When the session node was first created.
    pub created_at: DateTime<Utc>,
}

/// One question/answer turn within a session. Immutable once appended.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Unique message identifier (UUID v7).
    pub id: String,
    /// Owning session (the `HAS_MESSAGE` edge).
    pub session_id: String,
    /// Per-session insertion sequence number, starting at 0.
    /// The deterministic tail tie-break: chain order is `seq` order.
    pub seq: i64,
    /// Server-assigned timestamp, strictly increasing within a session.
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
}

/// Row of the per-session message count query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCount {
    pub session_id: String,
    pub messages: i64,
}

/// Row of the top-mentioned-entities queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionCount {
    pub name: String,
    pub mentions: i64,
}

/// Kind of a node in the entity reference catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    RiskFactor,
}

impl EntityKind {
    /// Short prefix used in derived entity ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            EntityKind::Company => "co",
            EntityKind::RiskFactor => "risk",
        }
    }

    /// The `kind` column value.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::RiskFactor => "risk_factor",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "company" => Some(EntityKind::Company),
            "risk_factor" => Some(EntityKind::RiskFactor),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the entity reference catalog. Content beyond id/name/kind is
/// owned by whatever system populates the catalog.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EntityRecord {
    /// Stable opaque identifier, e.g. `"co-1a2b3c4d5e6f"`.
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
}
