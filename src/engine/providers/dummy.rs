//! Dummy answering engine — offline, deterministic, catalog-backed.
//!
//! Resolves the question against the entity catalog and answers with a
//! canned sentence naming the match and its related entities. Used for
//! tests and keyless local runs; the reply's referenced ids are real
//! catalog ids, so the full append-and-link round trip is exercised
//! without any network access.

use std::collections::HashSet;

use crate::engine::{EngineReply, EngineRequest, ProviderError};
use crate::graph::{EntityCatalog, EntityKind, EntityRecord};

#[derive(Debug, Clone)]
pub struct DummyProvider {
    catalog: EntityCatalog,
}

impl DummyProvider {
    pub fn new(catalog: EntityCatalog) -> Self {
        Self { catalog }
    }

    pub fn answer(&self, request: &EngineRequest) -> Result<EngineReply, ProviderError> {
        let looked_up = self
            .catalog
            .lookup(&request.question)
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let Some(m) = looked_up else {
            return Ok(EngineReply {
                answer: format!(
                    "I could not match \"{}\" to any entity on record (turn {}).",
                    request.question.trim(),
                    request.context.len() + 1
                ),
                company_ids: HashSet::new(),
                risk_ids: HashSet::new(),
            });
        };

        let mut company_ids = HashSet::new();
        let mut risk_ids = HashSet::new();
        let mut collect = |e: &EntityRecord| match e.kind {
            EntityKind::Company => {
                company_ids.insert(e.id.clone());
            }
            EntityKind::RiskFactor => {
                risk_ids.insert(e.id.clone());
            }
        };
        collect(&m.entity);
        for related in &m.related {
            collect(related);
        }

        let answer = if m.related.is_empty() {
            format!("{} ({}) has no recorded related entities.", m.entity.name, m.entity.kind)
        } else {
            let names: Vec<&str> = m.related.iter().map(|e| e.name.as_str()).collect();
            format!(
                "{} ({}) is associated with: {}.",
                m.entity.name,
                m.entity.kind,
                names.join(", ")
            )
        };

        Ok(EngineReply { answer, company_ids, risk_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityCatalog;
    use tempfile::TempDir;

    fn make_provider() -> (TempDir, DummyProvider) {
        let temp = TempDir::new().unwrap();
        let catalog = EntityCatalog::open(temp.path()).unwrap();
        catalog
            .insert(&EntityRecord {
                id: "co-apple".into(),
                name: "Apple".into(),
                kind: EntityKind::Company,
            })
            .unwrap();
        catalog
            .insert(&EntityRecord {
                id: "risk-supply".into(),
                name: "Supply Chain Disruption".into(),
                kind: EntityKind::RiskFactor,
            })
            .unwrap();
        catalog.link("co-apple", "risk-supply").unwrap();
        (temp, DummyProvider::new(catalog))
    }

    fn request(question: &str) -> EngineRequest {
        EngineRequest { question: question.into(), context: Vec::new() }
    }

    #[test]
    fn matched_entity_and_related_are_referenced() {
        let (_temp, provider) = make_provider();
        let reply = provider.answer(&request("what risks does Apple face?")).unwrap();
        assert!(reply.answer.contains("Apple"));
        assert!(reply.company_ids.contains("co-apple"));
        assert!(reply.risk_ids.contains("risk-supply"));
    }

    #[test]
    fn unmatched_question_references_nothing() {
        let (_temp, provider) = make_provider();
        let reply = provider.answer(&request("tell me about the weather")).unwrap();
        assert!(reply.company_ids.is_empty());
        assert!(reply.risk_ids.is_empty());
        assert!(!reply.answer.is_empty());
    }

    #[test]
    fn same_question_is_deterministic() {
        let (_temp, provider) = make_provider();
        let a = provider.answer(&request("Apple?")).unwrap();
        let b = provider.answer(&request("Apple?")).unwrap();
        assert_eq!(a.answer, b.answer);
        assert_eq!(a.company_ids, b.company_ids);
    }
}
