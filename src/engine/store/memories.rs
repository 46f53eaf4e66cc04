// ── Recall Store: Memory Units ─────────────────────────────────────────────
//
// Row-level CRUD for memory_units plus the transactional write pipeline.
// All methods follow the store pattern: &self, lock conn, rusqlite params.
// Column names here MUST match schema.rs.
//
// The write pipeline (insert_memory_unit) runs detection, insertion,
// supersession, preference/entity/relation bookkeeping in ONE transaction;
// any error rolls the whole turn's write back. The embedding is computed by
// the caller beforehand so no await point ever holds the connection lock.

use super::vector::{blob_to_embedding, embedding_to_blob, l2_norm};
use super::MemoryStore;
use crate::atoms::constants::EXPLICIT_RELATION_WEIGHT;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    now_ts, BeliefTier, MemoryProposal, MemoryStats, MemoryUnit, Resolution, StructuredFact,
};
use crate::engine::contradiction::{detect_conflicts, Conflict, ConflictAction};
use crate::engine::tiering;
use crate::engine::{entities as entity_resolver, retrieval};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

/// Outcome of one write-pipeline run.
#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub memory_id: String,
    pub superseded: Vec<String>,
    pub pending_contradictions: usize,
    pub relations_created: usize,
    pub entities_linked: usize,
    pub preferences_written: usize,
    /// True when an existing higher-authority memory immediately superseded
    /// the new one (it was still inserted, inactive, for audit).
    pub absorbed_by_existing: bool,
}

// ═════════════════════════════════════════════════════════════════════════════
// Row mapping
// ═════════════════════════════════════════════════════════════════════════════

pub(crate) const MEMORY_COLUMNS: &str = "id, summary, entities, facts, structured_facts, supersedes,
     tier, confidence, valid_from, valid_to,
     base_importance, current_importance, last_decay_at,
     access_count, last_accessed_at, embedding,
     is_active, source_conversation_id, created_at";

pub(crate) fn memory_from_row(row: &Row) -> rusqlite::Result<MemoryUnit> {
    let entities_json: String = row.get(2)?;
    let facts_json: String = row.get(3)?;
    let structured_json: String = row.get(4)?;
    let supersedes_json: String = row.get(5)?;
    let tier_str: String = row.get(6)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(15)?;

    Ok(MemoryUnit {
        id: row.get(0)?,
        summary: row.get(1)?,
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        facts: serde_json::from_str(&facts_json).unwrap_or_default(),
        structured_facts: serde_json::from_str::<Vec<StructuredFact>>(&structured_json)
            .unwrap_or_default(),
        supersedes: serde_json::from_str(&supersedes_json).unwrap_or_default(),
        tier: BeliefTier::parse(&tier_str).unwrap_or_default(),
        confidence: row.get(7)?,
        valid_from: row.get(8)?,
        valid_to: row.get(9)?,
        base_importance: row.get(10)?,
        current_importance: row.get(11)?,
        last_decay_at: row.get(12)?,
        access_count: row.get::<_, i64>(13)? as u32,
        last_accessed_at: row.get(14)?,
        embedding: embedding_bytes.map(|b| blob_to_embedding(&b)),
        is_active: row.get::<_, i64>(16)? != 0,
        source_conversation_id: row.get(17)?,
        created_at: row.get(18)?,
    })
}

fn json_array<T: serde::Serialize>(value: &[T]) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

// ═════════════════════════════════════════════════════════════════════════════
// Connection-level helpers (shared with the write transaction)
// ═════════════════════════════════════════════════════════════════════════════

pub(crate) fn insert_memory_row(conn: &Connection, mem: &MemoryUnit) -> EngineResult<()> {
    let embedding_bytes = mem.embedding.as_ref().map(|v| embedding_to_blob(v));
    conn.execute(
        "INSERT INTO memory_units (
            id, summary, entities, facts, structured_facts, supersedes,
            tier, confidence, valid_from, valid_to,
            base_importance, current_importance, last_decay_at,
            access_count, last_accessed_at, embedding,
            is_active, source_conversation_id, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13,
            ?14, ?15, ?16,
            ?17, ?18, ?19
        )",
        params![
            mem.id,
            mem.summary,
            json_array(&mem.entities),
            json_array(&mem.facts),
            json_array(&mem.structured_facts),
            json_array(&mem.supersedes),
            mem.tier.as_str(),
            mem.confidence,
            mem.valid_from,
            mem.valid_to,
            mem.base_importance,
            mem.current_importance,
            mem.last_decay_at,
            mem.access_count as i64,
            mem.last_accessed_at,
            embedding_bytes,
            mem.is_active as i64,
            mem.source_conversation_id,
            mem.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_memory_conn(conn: &Connection, id: &str) -> EngineResult<Option<MemoryUnit>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memory_units WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row(params![id], memory_from_row).optional()?)
}

/// One-way transition: active → inactive. Never the reverse.
pub(crate) fn deactivate_memory_conn(conn: &Connection, id: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE memory_units SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Append `other` to a memory's supersedes array (append-only).
pub(crate) fn append_supersedes_conn(conn: &Connection, id: &str, other: &str) -> EngineResult<()> {
    if let Some(mut mem) = get_memory_conn(conn, id)? {
        if !mem.supersedes.iter().any(|s| s == other) {
            mem.supersedes.push(other.to_string());
            conn.execute(
                "UPDATE memory_units SET supersedes = ?2 WHERE id = ?1",
                params![id, json_array(&mem.supersedes)],
            )?;
        }
    }
    Ok(())
}

/// All active memories, embeddings included. The candidate pool for
/// retrieval and contradiction scans.
pub(crate) fn active_memories_conn(conn: &Connection) -> EngineResult<Vec<MemoryUnit>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memory_units WHERE is_active = 1 ORDER BY created_at DESC, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Raw bm25 rank per memory id for a free-text query (higher = better).
/// The FTS match expression is rebuilt from alphanumeric tokens so user
/// input can never inject FTS5 syntax.
pub(crate) fn text_rank_conn(conn: &Connection, query: &str) -> EngineResult<HashMap<String, f64>> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        return Ok(HashMap::new());
    }
    let expr = tokens.join(" OR ");

    let mut stmt = conn.prepare(
        "SELECT id, bm25(memory_units_fts) FROM memory_units_fts
         WHERE memory_units_fts MATCH ?1",
    )?;
    let mut map = HashMap::new();
    let rows = stmt.query_map(params![expr], |row| {
        let id: String = row.get(0)?;
        let rank: f64 = row.get(1)?;
        Ok((id, rank))
    })?;
    for row in rows.filter_map(|r| r.ok()) {
        // bm25() is "smaller is better" (negative); flip so higher is better.
        map.insert(row.0, -row.1);
    }
    Ok(map)
}

// ═════════════════════════════════════════════════════════════════════════════
// Public read/update API
// ═════════════════════════════════════════════════════════════════════════════

impl MemoryStore {
    pub fn get_memory(&self, id: &str) -> EngineResult<Option<MemoryUnit>> {
        let conn = self.conn.lock();
        get_memory_conn(&conn, id)
    }

    /// All memories, newest first. `include_inactive` widens the filter.
    pub fn all_memories(&self, include_inactive: bool) -> EngineResult<Vec<MemoryUnit>> {
        let conn = self.conn.lock();
        let sql = if include_inactive {
            format!("SELECT {MEMORY_COLUMNS} FROM memory_units ORDER BY created_at DESC, id")
        } else {
            format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_units WHERE is_active = 1
                 ORDER BY created_at DESC, id"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn memories_by_tier(&self, tier: BeliefTier) -> EngineResult<Vec<MemoryUnit>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_units
             WHERE is_active = 1 AND tier = ?1 ORDER BY created_at DESC, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tier.as_str()], memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn active_memories(&self) -> EngineResult<Vec<MemoryUnit>> {
        let conn = self.conn.lock();
        active_memories_conn(&conn)
    }

    pub fn text_rank(&self, query: &str) -> EngineResult<HashMap<String, f64>> {
        let conn = self.conn.lock();
        text_rank_conn(&conn, query)
    }

    /// Bump access_count and last_accessed_at for the retrieved ids.
    /// A single short transaction; counts never decrease.
    pub fn reinforce_memories(&self, ids: &[String]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_ts();
        for id in ids {
            tx.execute(
                "UPDATE memory_units
                 SET access_count = access_count + 1, last_accessed_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Rows stored without vectors, for the startup backfill pass.
    pub fn memories_without_embeddings(&self, limit: usize) -> EngineResult<Vec<MemoryUnit>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_units
             WHERE embedding IS NULL AND is_active = 1
             ORDER BY created_at DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update_memory_embedding(&self, id: &str, embedding: &[f32]) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE memory_units SET embedding = ?2 WHERE id = ?1",
            params![id, embedding_to_blob(embedding)],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> EngineResult<MemoryStats> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM memory_units", [], |r| r.get(0))?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_units WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        let (avg_conf, avg_imp): (f64, f64) = conn.query_row(
            "SELECT COALESCE(AVG(confidence), 0), COALESCE(AVG(current_importance), 0)
             FROM memory_units WHERE is_active = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let mut tier_counts = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT tier, COUNT(*) FROM memory_units WHERE is_active = 1 GROUP BY tier",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            tier_counts.insert(row.0, row.1 as usize);
        }

        let preferences: i64 = conn.query_row(
            "SELECT COUNT(*) FROM preferences WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        let entities: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        let relations: i64 = conn.query_row("SELECT COUNT(*) FROM relations", [], |r| r.get(0))?;
        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contradictions WHERE resolution = 'pending'",
            [],
            |r| r.get(0),
        )?;

        Ok(MemoryStats {
            total_memories: total as usize,
            active_memories: active as usize,
            tier_counts,
            average_confidence: avg_conf,
            average_importance: avg_imp,
            preferences: preferences as usize,
            entities: entities as usize,
            relations: relations as usize,
            pending_contradictions: pending as usize,
        })
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Write Pipeline
// ═════════════════════════════════════════════════════════════════════════════

impl MemoryStore {
    /// Insert one memory proposal. The embedding must already be computed
    /// (unit norm); everything else happens inside a single transaction:
    ///
    ///   detect conflicts → insert row → deactivate superseded → record
    ///   pending contradictions → preference rows → entity linking →
    ///   explicit relations → relation auto-discovery → commit.
    ///
    /// On any error the transaction rolls back and the error surfaces.
    pub fn insert_memory_unit(
        &self,
        proposal: &MemoryProposal,
        embedding: Vec<f32>,
        contradiction_threshold: f64,
    ) -> EngineResult<InsertReport> {
        let norm = l2_norm(&embedding);
        if !(0.99..=1.01).contains(&norm) {
            return Err(EngineError::Embedding(format!(
                "embedding norm {:.4} outside unit range",
                norm
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // ── 1. Conflict detection against the current snapshot ───────────
        let conflicts = detect_conflicts(&tx, proposal, &embedding, contradiction_threshold)?;

        let mut supersedes: Vec<String> = proposal.supersedes.clone();
        let mut absorbed_by: Option<String> = None;
        let mut pending: Vec<&Conflict> = Vec::new();
        for conflict in &conflicts {
            match conflict.action {
                ConflictAction::NewSupersedes => {
                    if !supersedes.contains(&conflict.existing_id) {
                        supersedes.push(conflict.existing_id.clone());
                    }
                }
                ConflictAction::ExistingSupersedes => {
                    absorbed_by = Some(conflict.existing_id.clone());
                }
                ConflictAction::Pending => pending.push(conflict),
            }
        }

        // ── 2. Insert the new memory row ─────────────────────────────────
        let now = now_ts();
        let confidence = tiering::enforce(proposal.tier, proposal.confidence);
        let base_importance = proposal.importance.clamp(1.0, 10.0);
        let memory = MemoryUnit {
            id: uuid::Uuid::new_v4().to_string(),
            summary: proposal.summary.clone(),
            entities: proposal.entities.clone(),
            facts: proposal.facts.clone(),
            structured_facts: proposal.structured_facts.clone(),
            tier: proposal.tier,
            confidence,
            valid_from: proposal.valid_from.clone(),
            valid_to: proposal.valid_to.clone(),
            base_importance,
            current_importance: base_importance,
            last_decay_at: now.clone(),
            access_count: 0,
            last_accessed_at: None,
            embedding: Some(embedding),
            is_active: absorbed_by.is_none(),
            supersedes: supersedes.clone(),
            source_conversation_id: proposal.source_conversation_id.clone(),
            created_at: now.clone(),
        };
        insert_memory_row(&tx, &memory)?;

        // ── 3. Apply supersession side effects ───────────────────────────
        for old_id in &supersedes {
            deactivate_memory_conn(&tx, old_id)?;
        }
        if let Some(winner) = &absorbed_by {
            append_supersedes_conn(&tx, winner, &memory.id)?;
        }

        // ── 4. Record pending contradictions (best-effort audit) ─────────
        let mut pending_recorded = 0usize;
        for conflict in &pending {
            let result = super::contradictions::insert_contradiction_conn(
                &tx,
                &memory.id,
                &conflict.existing_id,
                conflict.field_path.as_deref(),
                &conflict.reason,
                Resolution::Pending,
            );
            match result {
                Ok(()) => pending_recorded += 1,
                Err(e) => warn!("[store] Failed to record contradiction: {}", e),
            }
        }

        // ── 5. Preference rows (supersession discipline) ─────────────────
        let mut preferences_written = 0usize;
        for pref in &proposal.preferences {
            super::preferences::insert_preference_conn(&tx, pref, &memory.id)?;
            preferences_written += 1;
        }

        // ── 6. Entity canonicalization + join-set update ─────────────────
        let entities_linked =
            entity_resolver::link_proposal_entities(&tx, proposal, &memory.id)?;

        // ── 7. Explicit relations from the extractor ─────────────────────
        let mut relations_created = 0usize;
        for target in &proposal.related_to {
            if get_memory_conn(&tx, target)?.is_some() {
                super::relations::upsert_relation_conn(
                    &tx,
                    &memory.id,
                    target,
                    "related_to",
                    EXPLICIT_RELATION_WEIGHT,
                    true,
                )?;
                relations_created += 1;
            }
        }

        // ── 8. Relation auto-discovery via entity overlap ────────────────
        relations_created +=
            retrieval::discover_relations(&tx, &memory.id, &memory.entities)?;

        tx.commit()?;

        info!(
            "[store] ✓ Stored memory {} tier={} conf={:.2} superseded={} pending={}",
            &memory.id[..8],
            memory.tier.as_str(),
            memory.confidence,
            supersedes.len(),
            pending_recorded,
        );

        Ok(InsertReport {
            memory_id: memory.id,
            superseded: supersedes,
            pending_contradictions: pending_recorded,
            relations_created,
            entities_linked,
            preferences_written,
            absorbed_by_existing: absorbed_by.is_some(),
        })
    }
}
