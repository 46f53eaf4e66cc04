// ── Recall Store: Entities ─────────────────────────────────────────────────
//
// Entity rows with case-folded canonical lookup. `aliases` and `memory_ids`
// are JSON array join sets, mutated only under the write transaction.

use super::MemoryStore;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{EntityRecord, EntityType};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ENTITY_COLUMNS: &str =
    "id, canonical_name, aliases, entity_type, confidence, confirmed,
     memory_ids, first_seen_at, last_seen_at";

fn entity_from_row(row: &Row) -> rusqlite::Result<EntityRecord> {
    let aliases_json: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let memory_ids_json: String = row.get(6)?;
    Ok(EntityRecord {
        id: row.get(0)?,
        canonical_name: row.get(1)?,
        aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
        entity_type: EntityType::parse(&type_str),
        confidence: row.get(4)?,
        confirmed: row.get::<_, i64>(5)? != 0,
        memory_ids: serde_json::from_str(&memory_ids_json).unwrap_or_default(),
        first_seen_at: row.get(7)?,
        last_seen_at: row.get(8)?,
    })
}

fn json_array(value: &[String]) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

// ── Connection-level helpers (used inside the write transaction) ───────────

pub(crate) fn insert_entity_conn(conn: &Connection, entity: &EntityRecord) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO entities (
            id, canonical_name, aliases, entity_type, confidence, confirmed,
            memory_ids, first_seen_at, last_seen_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entity.id,
            entity.canonical_name,
            json_array(&entity.aliases),
            entity.entity_type.as_str(),
            entity.confidence,
            entity.confirmed as i64,
            json_array(&entity.memory_ids),
            entity.first_seen_at,
            entity.last_seen_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_entity_conn(conn: &Connection, entity: &EntityRecord) -> EngineResult<()> {
    conn.execute(
        "UPDATE entities SET
            canonical_name = ?2, aliases = ?3, entity_type = ?4, confidence = ?5,
            confirmed = ?6, memory_ids = ?7, last_seen_at = ?8
         WHERE id = ?1",
        params![
            entity.id,
            entity.canonical_name,
            json_array(&entity.aliases),
            entity.entity_type.as_str(),
            entity.confidence,
            entity.confirmed as i64,
            json_array(&entity.memory_ids),
            entity.last_seen_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_entity_conn(conn: &Connection, id: &str) -> EngineResult<()> {
    conn.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn get_entity_conn(conn: &Connection, id: &str) -> EngineResult<Option<EntityRecord>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row(params![id], entity_from_row).optional()?)
}

/// Case-folded lookup on canonical_name.
pub(crate) fn find_entity_by_canonical_conn(
    conn: &Connection,
    name: &str,
) -> EngineResult<Option<EntityRecord>> {
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE canonical_name = ?1 COLLATE NOCASE"
    );
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row(params![name], entity_from_row).optional()?)
}

/// Case-folded alias scan. Aliases are a JSON array so the match happens in
/// Rust; entity counts stay small enough for a full scan.
pub(crate) fn find_entity_by_alias_conn(
    conn: &Connection,
    name: &str,
) -> EngineResult<Option<EntityRecord>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities");
    let mut stmt = conn.prepare(&sql)?;
    let folded = name.to_lowercase();
    let rows = stmt.query_map([], entity_from_row)?;
    for row in rows.filter_map(|r| r.ok()) {
        if row.aliases.iter().any(|a| a.to_lowercase() == folded) {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

// ── Public API ─────────────────────────────────────────────────────────────

impl MemoryStore {
    pub fn all_entities(&self) -> EngineResult<Vec<EntityRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY last_seen_at DESC, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], entity_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_entity(&self, id: &str) -> EngineResult<Option<EntityRecord>> {
        let conn = self.conn.lock();
        get_entity_conn(&conn, id)
    }

    /// Mark an entity as user-confirmed and lift its confidence.
    pub fn confirm_entity(&self, id: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE entities SET confirmed = 1, confidence = MAX(confidence, 0.95)
             WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }
}
