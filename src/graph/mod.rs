//! Conversation graph persistence.
//!
//! A directed graph over one SQLite database:
//!
//! ```text
//! Session --HAS_MESSAGE--> Message --NEXT--> Message
//!                              |
//!                              +--INVOLVES_COMPANY--> EntityRecord
//!                              +--INVOLVES_RISK-----> EntityRecord
//! ```
//!
//! - [`ConversationGraph`] owns the write path (session upsert, atomic
//!   message append, reference linking) and the read path (analytics,
//!   chain reconstruction).
//! - [`EntityCatalog`] is the pre-existing entity reference store the
//!   conversation core points edges at but never mutates.
//!
//! Within one session, messages form a single linear chain: each append
//! runs in one `IMMEDIATE` transaction, tails are selected by a per-session
//! sequence counter rather than by timestamp, and the schema's uniqueness
//! constraints make a forked chain unrepresentable.

mod chain;
mod entities;
mod reader;
mod store_core;

pub use chain::ConversationGraph;
pub use entities::{EntityCatalog, EntityMatch};
pub use store_core::{
    derived_entity_id, EntityKind, EntityRecord, MentionCount, Message, Session, SessionCount,
};
