//! `reader` — read-only traversal and aggregate queries over the graph.
//!
//! All queries are side-effect-free. Chain reconstruction follows the
//! `NEXT` edges rather than sorting by timestamp, then *verifies* that the
//! walk agrees with sequence and timestamp order; a disagreement is reported
//! as [`AppError::ChainIntegrity`](crate::error::AppError::ChainIntegrity),
//! never repaired here.

use std::collections::HashMap;

use rusqlite::params;

use crate::error::AppError;

use super::chain::ConversationGraph;
use super::store_core::{
    micros_to_datetime, open_conn, EntityKind, EntityRecord, MentionCount, Message, SessionCount,
    REL_INVOLVES_COMPANY, REL_INVOLVES_RISK,
};

impl ConversationGraph {
    /// Message counts per session, largest first; ties broken by session id
    /// ascending.
    pub fn message_count_per_session(&self) -> Result<Vec<SessionCount>, AppError> {
        let conn = open_conn(self.db_path())?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, COUNT(*) AS n FROM messages
                 GROUP BY session_id
                 ORDER BY n DESC, session_id ASC",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare session counts: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionCount {
                    session_id: row.get(0)?,
                    messages: row.get(1)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("graph: query session counts: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: session count row: {e}"))))
            .collect()
    }

    /// The `limit` most-mentioned companies, mention count descending; ties
    /// broken by entity name ascending.
    pub fn top_mentioned_companies(&self, limit: usize) -> Result<Vec<MentionCount>, AppError> {
        self.top_mentioned(REL_INVOLVES_COMPANY, limit)
    }

    /// The `limit` most-mentioned risk factors, same ordering as
    /// [`top_mentioned_companies`](Self::top_mentioned_companies).
    pub fn top_mentioned_risk_factors(&self, limit: usize) -> Result<Vec<MentionCount>, AppError> {
        self.top_mentioned(REL_INVOLVES_RISK, limit)
    }

    /// The catalog entities a message references, ordered by name.
    ///
    /// This is the evidentiary grounding of one answer: every entity the
    /// linker attached, companies and risk factors alike (told apart by
    /// [`EntityRecord::kind`](crate::graph::EntityRecord)).
    pub fn message_references(&self, message_id: &str) -> Result<Vec<EntityRecord>, AppError> {
        let conn = open_conn(self.db_path())?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.name, e.kind
                 FROM mentions m
                 JOIN entities e ON e.id = m.entity_id
                 WHERE m.message_id = ?1
                 ORDER BY e.name ASC",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare message references: {e}")))?;
        let rows = stmt
            .query_map(params![message_id], |row| {
                let kind_str: String = row.get(2)?;
                let kind = EntityKind::parse(&kind_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown entity kind '{kind_str}'").into(),
                    )
                })?;
                Ok(EntityRecord { id: row.get(0)?, name: row.get(1)?, kind })
            })
            .map_err(|e| AppError::Storage(format!("graph: query message references: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: reference row: {e}"))))
            .collect()
    }

    fn top_mentioned(&self, rel: &str, limit: usize) -> Result<Vec<MentionCount>, AppError> {
        let conn = open_conn(self.db_path())?;
        let mut stmt = conn
            .prepare(
                "SELECT e.name, COUNT(*) AS n
                 FROM mentions m
                 JOIN entities e ON e.id = m.entity_id
                 WHERE m.rel = ?1
                 GROUP BY e.id
                 ORDER BY n DESC, e.name ASC
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare top mentioned: {e}")))?;
        let rows = stmt
            .query_map(params![rel, limit as i64], |row| {
                Ok(MentionCount {
                    name: row.get(0)?,
                    mentions: row.get(1)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("graph: query top mentioned: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("graph: mention row: {e}"))))
            .collect()
    }

    /// Rebuild a session's conversation in chain order by walking `NEXT`
    /// edges from the head.
    ///
    /// Returns an empty vector for a session with no messages. Any departure
    /// from a single linear chain — several heads, a cycle, an edge leaving
    /// the session, or chain order disagreeing with sequence/timestamp
    /// order — is a [`AppError::ChainIntegrity`] failure.
    pub fn reconstruct_session(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let conn = open_conn(self.db_path())?;

        let mut stmt = conn
            .prepare(
                "SELECT id, seq, ts_micros, question, answer FROM messages
                 WHERE session_id = ?1",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare reconstruct: {e}")))?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    session_id: session_id.to_string(),
                    seq: row.get(1)?,
                    timestamp: micros_to_datetime(row.get(2)?),
                    question: row.get(3)?,
                    answer: row.get(4)?,
                })
            })
            .map_err(|e| AppError::Storage(format!("graph: query messages: {e}")))?;

        let mut by_id: HashMap<String, Message> = HashMap::new();
        for row in rows {
            let m = row.map_err(|e| AppError::Storage(format!("graph: message row: {e}")))?;
            by_id.insert(m.id.clone(), m);
        }
        if by_id.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(
                "SELECT n.from_id, n.to_id FROM next_edges n
                 JOIN messages m ON m.id = n.from_id
                 WHERE m.session_id = ?1",
            )
            .map_err(|e| AppError::Storage(format!("graph: prepare next edges: {e}")))?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| AppError::Storage(format!("graph: query next edges: {e}")))?;

        let mut next: HashMap<String, String> = HashMap::new();
        let mut has_inbound: HashMap<&str, bool> = HashMap::new();
        let edges: Vec<(String, String)> = rows
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::Storage(format!("graph: next edge row: {e}")))?;
        for (from, to) in &edges {
            if !by_id.contains_key(to) {
                return Err(AppError::ChainIntegrity(format!(
                    "session {session_id}: NEXT edge {from} -> {to} leaves the session"
                )));
            }
            next.insert(from.clone(), to.clone());
        }
        for (_, to) in &edges {
            has_inbound.insert(to.as_str(), true);
        }

        let heads: Vec<&str> = by_id
            .keys()
            .filter(|id| !has_inbound.contains_key(id.as_str()))
            .map(|id| id.as_str())
            .collect();
        let head = match heads.as_slice() {
            [only] => only.to_string(),
            _ => {
                return Err(AppError::ChainIntegrity(format!(
                    "session {session_id}: expected one chain head, found {}",
                    heads.len()
                )));
            }
        };

        // Walk head -> tail; revisiting an already-removed node means a cycle.
        let mut ordered = Vec::with_capacity(by_id.len());
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let successor = next.get(&id).cloned();
            let message = by_id.remove(&id).ok_or_else(|| {
                AppError::ChainIntegrity(format!("session {session_id}: cycle through {id}"))
            })?;
            if let Some(prev) = ordered.last() {
                if message.seq <= prev.seq || message.timestamp <= prev.timestamp {
                    return Err(AppError::ChainIntegrity(format!(
                        "session {session_id}: chain order disagrees with sequence/timestamp \
                         order between {} and {}",
                        prev.id, message.id
                    )));
                }
            }
            ordered.push(message);
            cursor = successor;
        }

        if !by_id.is_empty() {
            return Err(AppError::ChainIntegrity(format!(
                "session {session_id}: {} message(s) unreachable from the chain head",
                by_id.len()
            )));
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::entities::{EntityCatalog, EntityKind, EntityRecord};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn make_graph() -> (TempDir, ConversationGraph) {
        let temp = TempDir::new().expect("tempdir");
        let graph = ConversationGraph::open(temp.path()).expect("open graph");
        (temp, graph)
    }

    fn seed_entity(temp: &TempDir, id: &str, name: &str, kind: EntityKind) -> EntityCatalog {
        let catalog = EntityCatalog::open(temp.path()).unwrap();
        catalog
            .insert(&EntityRecord { id: id.into(), name: name.into(), kind })
            .unwrap();
        catalog
    }

    fn ids(set: &[&str]) -> HashSet<String> {
        set.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reconstruct_empty_session_is_empty() {
        let (_temp, graph) = make_graph();
        graph.ensure_session("s1").unwrap();
        assert!(graph.reconstruct_session("s1").unwrap().is_empty());
        assert!(graph.reconstruct_session("never-created").unwrap().is_empty());
    }

    #[test]
    fn reconstruct_returns_chain_order() {
        let (_temp, graph) = make_graph();
        let m1 = graph.append_message("s1", "Q1", "A1").unwrap();
        let m2 = graph.append_message("s1", "Q2", "A2").unwrap();
        let m3 = graph.append_message("s1", "Q3", "A3").unwrap();

        let chain = graph.reconstruct_session("s1").unwrap();
        let chain_ids: Vec<&str> = chain.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(chain_ids, vec![m1.id.as_str(), m2.id.as_str(), m3.id.as_str()]);

        // Chain order, seq order, and timestamp order all agree.
        for pair in chain.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn orphan_message_is_an_integrity_error() {
        let (_temp, graph) = make_graph();
        graph.append_message("s1", "Q1", "A1").unwrap();
        graph.append_message("s1", "Q2", "A2").unwrap();

        // Simulate a partially-applied append from outside the writer: a
        // message row with no NEXT edge attaching it to the chain.
        let conn = rusqlite::Connection::open(graph.db_path()).unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, seq, ts_micros, question, answer)
             VALUES ('m-orphan', 's1', 99, 9999999999999999, 'Qx', 'Ax')",
            [],
        )
        .unwrap();

        let err = graph.reconstruct_session("s1").unwrap_err();
        assert!(matches!(err, AppError::ChainIntegrity(_)), "got: {err}");
    }

    #[test]
    fn message_counts_sorted_desc_then_by_session_id() {
        let (_temp, graph) = make_graph();
        graph.append_message("busy", "Q1", "A1").unwrap();
        graph.append_message("busy", "Q2", "A2").unwrap();
        graph.append_message("quiet-a", "Q1", "A1").unwrap();
        graph.append_message("quiet-b", "Q1", "A1").unwrap();

        let counts = graph.message_count_per_session().unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts[0].session_id, "busy");
        assert_eq!(counts[0].messages, 2);
        // Tie between the two single-message sessions breaks by id.
        assert_eq!(counts[1].session_id, "quiet-a");
        assert_eq!(counts[2].session_id, "quiet-b");
    }

    #[test]
    fn top_mentioned_companies_counts_and_limits() {
        let (temp, graph) = make_graph();
        let catalog = seed_entity(&temp, "co-apple", "Apple", EntityKind::Company);
        catalog
            .insert(&EntityRecord {
                id: "co-globex".into(),
                name: "Globex".into(),
                kind: EntityKind::Company,
            })
            .unwrap();

        let m1 = graph.append_message("s1", "Q1", "A1").unwrap();
        let m2 = graph.append_message("s1", "Q2", "A2").unwrap();
        graph
            .link_references(&m1.id, &ids(&["co-apple", "co-globex"]), &HashSet::new())
            .unwrap();
        graph
            .link_references(&m2.id, &ids(&["co-apple"]), &HashSet::new())
            .unwrap();

        let top = graph.top_mentioned_companies(10).unwrap();
        assert_eq!(top[0], MentionCount { name: "Apple".into(), mentions: 2 });
        assert_eq!(top[1], MentionCount { name: "Globex".into(), mentions: 1 });

        let capped = graph.top_mentioned_companies(1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn company_and_risk_tallies_are_separate() {
        let (temp, graph) = make_graph();
        let catalog = seed_entity(&temp, "co-apple", "Apple", EntityKind::Company);
        catalog
            .insert(&EntityRecord {
                id: "risk-supply".into(),
                name: "Supply Chain Disruption".into(),
                kind: EntityKind::RiskFactor,
            })
            .unwrap();

        let m = graph.append_message("s1", "Q1", "A1").unwrap();
        graph
            .link_references(&m.id, &ids(&["co-apple"]), &ids(&["risk-supply"]))
            .unwrap();

        let companies = graph.top_mentioned_companies(10).unwrap();
        let risks = graph.top_mentioned_risk_factors(10).unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Apple");
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].name, "Supply Chain Disruption");
    }
}
