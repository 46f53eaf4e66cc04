// ── Recall Store: Preferences ──────────────────────────────────────────────
//
// Preference rows are content-immutable. An update inserts a fresh row and
// flips is_active on the prior row, pointing superseded_by at the new id.

use super::MemoryStore;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{now_ts, Preference, PreferenceProposal, Valence};
use rusqlite::{params, Connection, Row};

fn preference_from_row(row: &Row) -> rusqlite::Result<Preference> {
    let valence_str: String = row.get(3)?;
    Ok(Preference {
        id: row.get(0)?,
        subject: row.get(1)?,
        entity: row.get(2)?,
        valence: Valence::parse(&valence_str).unwrap_or(Valence::Neutral),
        strength: row.get(4)?,
        context: row.get(5)?,
        confidence: row.get(6)?,
        memory_id: row.get(7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        superseded_by: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const PREF_COLUMNS: &str =
    "id, subject, entity, valence, strength, context, confidence, memory_id,
     is_active, superseded_by, created_at";

/// Insert a preference row linked to a memory, superseding any prior active
/// preference for the same entity (case-insensitive).
pub(crate) fn insert_preference_conn(
    conn: &Connection,
    pref: &PreferenceProposal,
    memory_id: &str,
) -> EngineResult<String> {
    let new_id = uuid::Uuid::new_v4().to_string();

    // Supersede prior active rows for this entity before inserting.
    let prior_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM preferences
             WHERE is_active = 1 AND entity = ?1 COLLATE NOCASE AND subject = 'user'",
        )?;
        let rows = stmt.query_map(params![pref.entity], |row| row.get::<_, String>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };
    for prior in &prior_ids {
        conn.execute(
            "UPDATE preferences SET is_active = 0, superseded_by = ?2 WHERE id = ?1",
            params![prior, new_id],
        )?;
    }

    conn.execute(
        "INSERT INTO preferences (
            id, subject, entity, valence, strength, context, confidence,
            memory_id, is_active, superseded_by, created_at
        ) VALUES (?1, 'user', ?2, ?3, ?4, ?5, ?6, ?7, 1, NULL, ?8)",
        params![
            new_id,
            pref.entity,
            pref.valence.as_str(),
            pref.strength.clamp(0.0, 1.0),
            pref.context,
            0.85f32,
            memory_id,
            now_ts(),
        ],
    )?;

    Ok(new_id)
}

impl MemoryStore {
    /// Active preferences, optionally filtered by entity and/or valence.
    pub fn user_preferences(
        &self,
        entity: Option<&str>,
        valence: Option<Valence>,
    ) -> EngineResult<Vec<Preference>> {
        let conn = self.conn.lock();
        let mut sql = format!(
            "SELECT {PREF_COLUMNS} FROM preferences WHERE is_active = 1"
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(e) = entity {
            args.push(e.to_string());
            sql.push_str(&format!(" AND entity = ?{} COLLATE NOCASE", args.len()));
        }
        if let Some(v) = valence {
            args.push(v.as_str().to_string());
            sql.push_str(&format!(" AND valence = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), preference_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
