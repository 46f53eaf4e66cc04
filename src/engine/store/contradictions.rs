// ── Recall Store: Contradictions ───────────────────────────────────────────
//
// Conflict rows created by the write pipeline when auto-resolution declines.
// Manual resolution applies the supersession side effects and stamps
// resolved_at; lifecycle transitions are one-way.

use super::MemoryStore;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{now_ts, Contradiction, Resolution};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

const CONTRADICTION_COLUMNS: &str =
    "id, memory_a, memory_b, field_path, reason, resolution, resolution_note,
     detected_at, resolved_at";

fn contradiction_from_row(row: &Row) -> rusqlite::Result<Contradiction> {
    let resolution_str: String = row.get(5)?;
    Ok(Contradiction {
        id: row.get(0)?,
        memory_a: row.get(1)?,
        memory_b: row.get(2)?,
        field_path: row.get(3)?,
        reason: row.get(4)?,
        resolution: Resolution::parse(&resolution_str).unwrap_or(Resolution::Pending),
        resolution_note: row.get(6)?,
        detected_at: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

pub(crate) fn insert_contradiction_conn(
    conn: &Connection,
    memory_a: &str,
    memory_b: &str,
    field_path: Option<&str>,
    reason: &str,
    resolution: Resolution,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO contradictions (
            id, memory_a, memory_b, field_path, reason, resolution, detected_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid::Uuid::new_v4().to_string(),
            memory_a,
            memory_b,
            field_path,
            reason,
            resolution.as_str(),
            now_ts(),
        ],
    )?;
    Ok(())
}

impl MemoryStore {
    /// Contradictions still awaiting a decision.
    pub fn pending_contradictions(&self) -> EngineResult<Vec<Contradiction>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {CONTRADICTION_COLUMNS} FROM contradictions
             WHERE resolution = 'pending' ORDER BY detected_at DESC, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], contradiction_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_contradiction(&self, id: &str) -> EngineResult<Option<Contradiction>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {CONTRADICTION_COLUMNS} FROM contradictions WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt
            .query_row(params![id], contradiction_from_row)
            .optional()?)
    }

    /// Apply a manual resolution. `a_supersedes` / `b_supersedes` deactivate
    /// the losing side and append it to the winner's supersedes array; every
    /// terminal state stamps resolved_at. All in one transaction.
    pub fn resolve_contradiction(
        &self,
        id: &str,
        resolution: Resolution,
        note: Option<&str>,
    ) -> EngineResult<Contradiction> {
        if resolution == Resolution::Pending {
            return Err(EngineError::Input(
                "cannot resolve a contradiction back to pending".into(),
            ));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sql = format!("SELECT {CONTRADICTION_COLUMNS} FROM contradictions WHERE id = ?1");
        let existing = {
            let mut stmt = tx.prepare(&sql)?;
            stmt.query_row(params![id], contradiction_from_row)
                .optional()?
        };
        let mut record = existing
            .ok_or_else(|| EngineError::Input(format!("unknown contradiction: {id}")))?;

        if record.resolution != Resolution::Pending {
            return Err(EngineError::Input(format!(
                "contradiction {id} already resolved as {}",
                record.resolution.as_str()
            )));
        }

        match resolution {
            Resolution::ASupersedes => {
                super::memories::deactivate_memory_conn(&tx, &record.memory_b)?;
                super::memories::append_supersedes_conn(&tx, &record.memory_a, &record.memory_b)?;
            }
            Resolution::BSupersedes => {
                super::memories::deactivate_memory_conn(&tx, &record.memory_a)?;
                super::memories::append_supersedes_conn(&tx, &record.memory_b, &record.memory_a)?;
            }
            _ => {}
        }

        let now = now_ts();
        tx.execute(
            "UPDATE contradictions
             SET resolution = ?2, resolution_note = ?3, resolved_at = ?4
             WHERE id = ?1",
            params![id, resolution.as_str(), note, now],
        )?;
        tx.commit()?;

        info!(
            "[store] Contradiction {} resolved as {}",
            &id[..8.min(id.len())],
            resolution.as_str()
        );

        record.resolution = resolution;
        record.resolution_note = note.map(|s| s.to_string());
        record.resolved_at = Some(now);
        Ok(record)
    }
}
