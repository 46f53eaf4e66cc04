// ── Recall Store: Relations ────────────────────────────────────────────────
//
// Directed weighted edges between memories, unique per
// (source, target, relation_type). A conflicting insert max-merges the
// weight instead of failing — repeated discovery only ever strengthens.

use super::MemoryStore;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{now_ts, Relation};
use rusqlite::{params, Connection, Row};

fn relation_from_row(row: &Row) -> rusqlite::Result<Relation> {
    Ok(Relation {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        relation_type: row.get(2)?,
        weight: row.get(3)?,
        bidirectional: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

const RELATION_COLUMNS: &str =
    "source_id, target_id, relation_type, weight, bidirectional, created_at";

/// Upsert an edge. On conflict the weight becomes max(existing, new) and
/// bidirectionality is sticky (once true, stays true).
pub(crate) fn upsert_relation_conn(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    relation_type: &str,
    weight: f64,
    bidirectional: bool,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO relations (source_id, target_id, relation_type, weight, bidirectional, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
            weight = MAX(weight, excluded.weight),
            bidirectional = MAX(bidirectional, excluded.bidirectional)",
        params![
            source_id,
            target_id,
            relation_type,
            weight.clamp(0.0, 1.0),
            bidirectional as i64,
            now_ts(),
        ],
    )?;
    Ok(())
}

/// Edges usable for spreading out of `id`: outgoing edges, plus incoming
/// edges marked bidirectional. Each result is (neighbor, type, weight).
pub(crate) fn neighbors_conn(
    conn: &Connection,
    id: &str,
) -> EngineResult<Vec<(String, String, f64)>> {
    let mut out = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT target_id, relation_type, weight FROM relations WHERE source_id = ?1",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        out.extend(rows.filter_map(|r| r.ok()));
    }
    {
        let mut stmt = conn.prepare(
            "SELECT source_id, relation_type, weight FROM relations
             WHERE target_id = ?1 AND bidirectional = 1",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        out.extend(rows.filter_map(|r| r.ok()));
    }
    Ok(out)
}

impl MemoryStore {
    /// All edges touching a memory, for the /memories/:id/relations surface.
    pub fn relations_for(&self, id: &str) -> EngineResult<Vec<Relation>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {RELATION_COLUMNS} FROM relations
             WHERE source_id = ?1 OR target_id = ?1
             ORDER BY weight DESC, target_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id], relation_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn upsert_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        weight: f64,
        bidirectional: bool,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        upsert_relation_conn(&conn, source_id, target_id, relation_type, weight, bidirectional)
    }
}
