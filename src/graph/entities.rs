//! `entities` — the entity reference catalog.
//!
//! Holds the pre-existing domain nodes (companies, risk factors) that
//! conversation messages can reference. The catalog is populated by seeding
//! (administration-time), and only *read* by the conversation core: the
//! [`ConversationGraph`](super::chain::ConversationGraph) creates reference
//! edges pointing at catalog nodes but never creates, edits, or deletes the
//! nodes themselves.
//!
//! Lookup implements the narrow entity-resolution contract consumed by the
//! answering engine: free text in, at most one matching entity (plus its
//! related entities) out.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;

use super::store_core::{derived_entity_id, init_db, open_conn, DB_FILENAME};

pub use super::store_core::{EntityKind, EntityRecord};

/// A successful free-text lookup: the best-matching entity and the entities
/// linked to it in the catalog.
#[derive(Debug, Clone)]
pub struct EntityMatch {
    pub entity: EntityRecord,
    pub related: Vec<EntityRecord>,
}

/// Read-mostly store of referenceable domain entities.
///
/// Shares the database file with [`ConversationGraph`](super::chain::ConversationGraph);
/// both stores open short-lived connections per call, so instances are cheap
/// and freely clonable.
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    db_path: PathBuf,
}

impl EntityCatalog {
    /// Open (or create) the catalog inside `data_dir`.
    ///
    /// Creates the directory and initialises (or validates) the shared SQLite
    /// schema. Safe to call repeatedly.
    pub fn open(data_dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(data_dir).map_err(|e| {
            AppError::Storage(format!("catalog: cannot create {}: {e}", data_dir.display()))
        })?;
        let db_path = data_dir.join(DB_FILENAME);
        init_db(&db_path)?;
        Ok(Self { db_path })
    }

    // ── Seeding (administration-time writes) ──────────────────────────────

    /// Insert an entity if absent (merge by id). Returns `true` when a new
    /// row was created, `false` when an entity with that id or name already
    /// existed.
    pub fn insert(&self, record: &EntityRecord) -> Result<bool, AppError> {
        let conn = open_conn(&self.db_path)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO entities (id, name, kind) VALUES (?1, ?2, ?3)",
                params![record.id, record.name, record.kind.as_str()],
            )
            .map_err(|e| AppError::Storage(format!("catalog: insert {}: {e}", record.id)))?;
        Ok(inserted > 0)
    }

    /// Record that two catalog entities are related (merge semantics).
    /// Both ids must already exist; the link is stored once and traversed in
    /// both directions by [`related`](Self::related).
    pub fn link(&self, entity_id: &str, related_id: &str) -> Result<(), AppError> {
        let conn = open_conn(&self.db_path)?;
        conn.execute(
            "INSERT OR IGNORE INTO entity_links (entity_id, related_id) VALUES (?1, ?2)",
            params![entity_id, related_id],
        )
        .map_err(|e| {
            AppError::Storage(format!("catalog: link {entity_id} -> {related_id}: {e}"))
        })?;
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// Fetch an entity by id.
    pub fn get(&self, id: &str) -> Result<Option<EntityRecord>, AppError> {
        let conn = open_conn(&self.db_path)?;
        conn.query_row(
            "SELECT id, name, kind FROM entities WHERE id = ?1",
            params![id],
            row_to_entity,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("catalog: get {id}: {e}")))
    }

    /// All entities linked to `id`, following `entity_links` in both
    /// directions, ordered by name.
    pub fn related(&self, id: &str) -> Result<Vec<EntityRecord>, AppError> {
        let conn = open_conn(&self.db_path)?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.name, e.kind FROM entities e
                 WHERE e.id IN (
                     SELECT related_id FROM entity_links WHERE entity_id = ?1
                     UNION
                     SELECT entity_id FROM entity_links WHERE related_id = ?1
                 )
                 ORDER BY e.name ASC",
            )
            .map_err(|e| AppError::Storage(format!("catalog: prepare related: {e}")))?;
        let rows = stmt
            .query_map(params![id], row_to_entity)
            .map_err(|e| AppError::Storage(format!("catalog: query related {id}: {e}")))?;
        rows.map(|r| r.map_err(|e| AppError::Storage(format!("catalog: related row: {e}"))))
            .collect()
    }

    /// Resolve free text to at most one entity.
    ///
    /// An entity matches when its name occurs in `text` (case-insensitive).
    /// The longest matching name wins; equal lengths are broken by name
    /// order so resolution is deterministic. Returns the match together with
    /// its related entities, or `None` when nothing matches.
    pub fn lookup(&self, text: &str) -> Result<Option<EntityMatch>, AppError> {
        let text_lower = text.to_lowercase();
        let conn = open_conn(&self.db_path)?;
        let mut stmt = conn
            .prepare("SELECT id, name, kind FROM entities ORDER BY name ASC")
            .map_err(|e| AppError::Storage(format!("catalog: prepare lookup: {e}")))?;
        let rows = stmt
            .query_map([], row_to_entity)
            .map_err(|e| AppError::Storage(format!("catalog: query lookup: {e}")))?;

        let mut best: Option<EntityRecord> = None;
        for row in rows {
            let entity =
                row.map_err(|e| AppError::Storage(format!("catalog: lookup row: {e}")))?;
            if !text_lower.contains(&entity.name.to_lowercase()) {
                continue;
            }
            // ORDER BY name already fixes the tie order, so only a strictly
            // longer name displaces the current best.
            let better = match &best {
                Some(b) => entity.name.len() > b.name.len(),
                None => true,
            };
            if better {
                best = Some(entity);
            }
        }

        match best {
            Some(entity) => {
                let related = self.related(&entity.id)?;
                Ok(Some(EntityMatch { entity, related }))
            }
            None => Ok(None),
        }
    }

    /// Total number of catalog entities.
    pub fn len(&self) -> Result<i64, AppError> {
        let conn = open_conn(&self.db_path)?;
        conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(|e| AppError::Storage(format!("catalog: count: {e}")))
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    // ── Seed file ─────────────────────────────────────────────────────────

    /// Load a TOML seed file and merge its contents into the catalog.
    ///
    /// Risk factors named under a company's `risks` list that have no
    /// `[[risk_factors]]` section of their own are created with derived ids.
    /// Re-running against the same file is a no-op.
    pub fn seed_from_file(&self, path: &Path) -> Result<(), AppError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        let seed: SeedFile = toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

        let mut inserted = 0usize;

        for r in &seed.risk_factors {
            let record = r.to_record(EntityKind::RiskFactor);
            if self.insert(&record)? {
                inserted += 1;
            }
        }

        for c in &seed.companies {
            let record = c.entry.to_record(EntityKind::Company);
            if self.insert(&record)? {
                inserted += 1;
            }
            for risk_name in &c.risks {
                let risk_id = seed
                    .risk_factors
                    .iter()
                    .find(|r| r.name.eq_ignore_ascii_case(risk_name))
                    .map(|r| r.id_or_derived(EntityKind::RiskFactor))
                    .unwrap_or_else(|| derived_entity_id(EntityKind::RiskFactor, risk_name));
                let risk = EntityRecord {
                    id: risk_id.clone(),
                    name: risk_name.clone(),
                    kind: EntityKind::RiskFactor,
                };
                if self.insert(&risk)? {
                    inserted += 1;
                }
                self.link(&record.id, &risk_id)?;
            }
        }

        info!(
            file = %path.display(),
            inserted,
            total = self.len()?,
            "entity catalog seeded"
        );
        Ok(())
    }
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
    let kind_str: String = row.get(2)?;
    let kind = EntityKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown entity kind '{kind_str}'").into(),
        )
    })?;
    Ok(EntityRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
    })
}

// ── Seed file shape ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SeedFile {
    #[serde(default)]
    companies: Vec<CompanySeed>,
    #[serde(default)]
    risk_factors: Vec<EntitySeed>,
}

#[derive(Deserialize)]
struct CompanySeed {
    #[serde(flatten)]
    entry: EntitySeed,
    /// Names of risk factors this company is linked to.
    #[serde(default)]
    risks: Vec<String>,
}

#[derive(Deserialize)]
struct EntitySeed {
    name: String,
    /// Explicit stable id; derived from the name when omitted.
    #[serde(default)]
    id: Option<String>,
}

impl EntitySeed {
    fn id_or_derived(&self, kind: EntityKind) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| derived_entity_id(kind, &self.name))
    }

    fn to_record(&self, kind: EntityKind) -> EntityRecord {
        EntityRecord {
            id: self.id_or_derived(kind),
            name: self.name.clone(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_catalog() -> (TempDir, EntityCatalog) {
        let temp = TempDir::new().expect("tempdir");
        let catalog = EntityCatalog::open(temp.path()).expect("open catalog");
        (temp, catalog)
    }

    fn company(id: &str, name: &str) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntityKind::Company,
        }
    }

    fn risk(id: &str, name: &str) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntityKind::RiskFactor,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let (_temp, catalog) = make_catalog();
        assert!(catalog.insert(&company("co-apple", "Apple")).unwrap());
        assert!(!catalog.insert(&company("co-apple", "Apple")).unwrap());
        assert_eq!(catalog.len().unwrap(), 1);
    }

    #[test]
    fn get_returns_inserted_entity() {
        let (_temp, catalog) = make_catalog();
        catalog.insert(&company("co-apple", "Apple")).unwrap();
        let fetched = catalog.get("co-apple").unwrap().expect("should exist");
        assert_eq!(fetched.name, "Apple");
        assert_eq!(fetched.kind, EntityKind::Company);
        assert!(catalog.get("co-missing").unwrap().is_none());
    }

    #[test]
    fn related_follows_links_both_ways() {
        let (_temp, catalog) = make_catalog();
        catalog.insert(&company("co-apple", "Apple")).unwrap();
        catalog.insert(&risk("risk-supply", "Supply Chain Disruption")).unwrap();
        catalog.link("co-apple", "risk-supply").unwrap();

        let from_company = catalog.related("co-apple").unwrap();
        assert_eq!(from_company.len(), 1);
        assert_eq!(from_company[0].id, "risk-supply");

        // Reverse direction works without a second link row.
        let from_risk = catalog.related("risk-supply").unwrap();
        assert_eq!(from_risk.len(), 1);
        assert_eq!(from_risk[0].id, "co-apple");
    }

    #[test]
    fn lookup_prefers_longest_match() {
        let (_temp, catalog) = make_catalog();
        catalog.insert(&company("co-micro", "Micro")).unwrap();
        catalog.insert(&company("co-microsoft", "Microsoft")).unwrap();

        let m = catalog
            .lookup("what risks does microsoft face?")
            .unwrap()
            .expect("should match");
        assert_eq!(m.entity.id, "co-microsoft");
    }

    #[test]
    fn lookup_no_match_returns_none() {
        let (_temp, catalog) = make_catalog();
        catalog.insert(&company("co-apple", "Apple")).unwrap();
        assert!(catalog.lookup("completely unrelated text").unwrap().is_none());
    }

    #[test]
    fn seed_file_round_trip_and_idempotence() {
        let (_temp, catalog) = make_catalog();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            br#"
[[companies]]
name = "Apple"
id = "co-apple"
risks = ["Supply Chain Disruption"]

[[risk_factors]]
name = "Supply Chain Disruption"
id = "risk-supplychain"
"#,
        )
        .unwrap();

        catalog.seed_from_file(f.path()).unwrap();
        assert_eq!(catalog.len().unwrap(), 2);
        let related = catalog.related("co-apple").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, "risk-supplychain");

        // Re-seeding changes nothing.
        catalog.seed_from_file(f.path()).unwrap();
        assert_eq!(catalog.len().unwrap(), 2);
    }

    #[test]
    fn seed_file_derives_ids_for_unlisted_risks() {
        let (_temp, catalog) = make_catalog();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            br#"
[[companies]]
name = "Acme"
risks = ["Currency Exposure"]
"#,
        )
        .unwrap();

        catalog.seed_from_file(f.path()).unwrap();
        assert_eq!(catalog.len().unwrap(), 2);
        let related = catalog
            .related(&derived_entity_id(EntityKind::Company, "Acme"))
            .unwrap();
        assert_eq!(related.len(), 1);
        assert!(related[0].id.starts_with("risk-"));
        assert_eq!(related[0].name, "Currency Exposure");
    }
}
