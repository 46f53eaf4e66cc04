// ── Recall Engine: Decay Service ───────────────────────────────────────────
//
// Importance under exponential decay with access-based reinforcement:
//
//   decayed       = base · exp(−λ · days_since_created)
//   reinforcement = β · min(access_count, 10) · (1 − days_since_access/7)
//                   (zero once the last access is a week old)
//   current       = max(decayed + reinforcement, floor)
//
// Decay is anchored on created_at so the curve is translation-consistent
// regardless of when sweeps run; last_decay_at records the last sweep for
// the audit trail. Sweeps run at startup and every DECAY_INTERVAL_HOURS,
// archive stale low-importance memories, and append decay_log rows when the
// change is material.

use crate::atoms::constants::{
    ARCHIVE_AGE_DAYS, ARCHIVE_IMPORTANCE_CUTOFF, DECAY_LOG_EPSILON, REINFORCEMENT_ACCESS_CAP,
    REINFORCEMENT_WINDOW_DAYS,
};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{now_ts, DecayLogEntry, TS_FORMAT};
use crate::engine::store::MemoryStore;
use log::{info, warn};
use rusqlite::params;
use std::sync::Arc;

/// Decay tunables, resolved once from the environment at startup.
#[derive(Debug, Clone, Copy)]
pub struct DecayParams {
    /// λ per day.
    pub decay_rate: f64,
    /// β per recent access.
    pub reinforcement_bonus: f64,
    /// Importance never drops below this.
    pub importance_floor: f64,
}

/// Days elapsed since a canonical timestamp. Unparseable input is treated
/// as 30 days old, matching the store's other timestamp fallbacks.
fn days_since(timestamp: &str, now: &chrono::DateTime<chrono::Utc>) -> f64 {
    match chrono::NaiveDateTime::parse_from_str(timestamp, TS_FORMAT) {
        Ok(parsed) => {
            let dt = parsed.and_utc();
            (*now - dt).num_seconds() as f64 / 86_400.0
        }
        Err(_) => 30.0,
    }
}

/// Pure importance computation for one memory.
/// Returns (current, decay_factor, reinforcement).
pub fn compute_importance(
    base_importance: f64,
    days_since_created: f64,
    days_since_access: Option<f64>,
    access_count: u32,
    params: &DecayParams,
) -> (f64, f64, f64) {
    let decay_factor = (-params.decay_rate * days_since_created.max(0.0)).exp();
    let decayed = base_importance * decay_factor;

    let reinforcement = match days_since_access {
        Some(days) if days < REINFORCEMENT_WINDOW_DAYS => {
            params.reinforcement_bonus
                * access_count.min(REINFORCEMENT_ACCESS_CAP) as f64
                * (1.0 - days / REINFORCEMENT_WINDOW_DAYS)
        }
        _ => 0.0,
    };

    let current = (decayed + reinforcement).max(params.importance_floor);
    (current, decay_factor, reinforcement)
}

/// Apply decay to every active memory in one transaction. Rewrites
/// current_importance, stamps last_decay_at, archives stale low-importance
/// rows, and appends decay_log entries for material changes.
/// Returns the number of memories whose importance changed materially.
pub fn run_decay_update(store: &MemoryStore, params: &DecayParams) -> EngineResult<usize> {
    let now = chrono::Utc::now();
    let now_str = now_ts();

    let mut conn = store.conn.lock();
    let tx = conn.transaction()?;

    let rows: Vec<(String, f64, f64, String, Option<String>, u32)> = {
        let mut stmt = tx.prepare(
            "SELECT id, base_importance, current_importance, created_at,
                    last_accessed_at, access_count
             FROM memory_units WHERE is_active = 1",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)? as u32,
            ))
        })?;
        mapped.filter_map(|r| r.ok()).collect()
    };

    let mut updated = 0usize;
    let mut archived = 0usize;
    for (id, base, old_current, created_at, last_accessed_at, access_count) in rows {
        let age_days = days_since(&created_at, &now);
        let access_days = last_accessed_at.as_deref().map(|ts| days_since(ts, &now));
        let (current, decay_factor, reinforcement) =
            compute_importance(base, age_days, access_days, access_count, params);

        tx.execute(
            "UPDATE memory_units SET current_importance = ?2, last_decay_at = ?3 WHERE id = ?1",
            params![id, current, now_str],
        )?;

        let material = (current - old_current).abs() >= DECAY_LOG_EPSILON;
        if material {
            updated += 1;
            tx.execute(
                "INSERT INTO decay_log (memory_id, old_importance, new_importance,
                                        decay_factor, reinforcement, run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, old_current, current, decay_factor, reinforcement, now_str],
            )?;
        }

        // Archival: faded and old. The row stays for the audit trail.
        if current < ARCHIVE_IMPORTANCE_CUTOFF && age_days > ARCHIVE_AGE_DAYS {
            tx.execute(
                "UPDATE memory_units SET is_active = 0 WHERE id = ?1",
                params![id],
            )?;
            archived += 1;
        }
    }

    tx.commit()?;

    if updated > 0 || archived > 0 {
        info!(
            "[decay] Sweep complete: {} updated, {} archived",
            updated, archived
        );
    }
    Ok(updated)
}

/// Read back the audit trail for one memory (or everything when None).
pub fn decay_log(store: &MemoryStore, memory_id: Option<&str>) -> EngineResult<Vec<DecayLogEntry>> {
    let conn = store.conn.lock();
    let (sql, args): (&str, Vec<String>) = match memory_id {
        Some(id) => (
            "SELECT memory_id, old_importance, new_importance, decay_factor, reinforcement, run_at
             FROM decay_log WHERE memory_id = ?1 ORDER BY id DESC LIMIT 200",
            vec![id.to_string()],
        ),
        None => (
            "SELECT memory_id, old_importance, new_importance, decay_factor, reinforcement, run_at
             FROM decay_log ORDER BY id DESC LIMIT 200",
            vec![],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(DecayLogEntry {
                memory_id: row.get(0)?,
                old_importance: row.get(1)?,
                new_importance: row.get(2)?,
                decay_factor: row.get(3)?,
                reinforcement: row.get(4)?,
                run_at: row.get(5)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Background sweep: one run at startup, then every `interval_hours`.
pub async fn run_decay_loop(store: Arc<MemoryStore>, params: DecayParams, interval_hours: u64) {
    if let Err(e) = run_decay_update(&store, &params) {
        warn!("[decay] Startup sweep failed: {}", e);
    }
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(interval_hours * 3600));
    ticker.tick().await; // first tick fires immediately; already swept above
    loop {
        ticker.tick().await;
        if let Err(e) = run_decay_update(&store, &params) {
            warn!("[decay] Sweep failed: {}", e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn default_params() -> DecayParams {
        DecayParams {
            decay_rate: 0.05,
            reinforcement_bonus: 0.3,
            importance_floor: 1.0,
        }
    }

    #[test]
    fn fourteen_day_decay_without_access() {
        // base 5, 14 days old, never accessed: 5·exp(−0.05·14) ≈ 2.48
        let (current, _, reinforcement) =
            compute_importance(5.0, 14.0, None, 0, &default_params());
        assert!(reinforcement.abs() < 1e-12);
        assert!((current - 5.0 * (-0.05f64 * 14.0).exp()).abs() < 1e-9);
        assert!((current - 2.48).abs() < 0.01);
    }

    #[test]
    fn recent_accesses_reinforce() {
        // Same memory after 5 accesses, last one a day ago:
        // reinforcement = 0.3·5·(6/7) ≈ 1.286, current ≈ 3.77
        let (current, _, reinforcement) =
            compute_importance(5.0, 14.0, Some(1.0), 5, &default_params());
        assert!((reinforcement - 0.3 * 5.0 * (6.0 / 7.0)).abs() < 1e-9);
        assert!((current - 3.77).abs() < 0.01);
    }

    #[test]
    fn stale_access_gives_no_reinforcement() {
        let (_, _, reinforcement) =
            compute_importance(5.0, 14.0, Some(8.0), 5, &default_params());
        assert_eq!(reinforcement, 0.0);
    }

    #[test]
    fn access_count_is_capped() {
        let (_, _, r_capped) = compute_importance(5.0, 1.0, Some(0.0), 50, &default_params());
        let (_, _, r_ten) = compute_importance(5.0, 1.0, Some(0.0), 10, &default_params());
        assert!((r_capped - r_ten).abs() < 1e-12);
    }

    #[test]
    fn floor_holds() {
        // Ancient memory decays essentially to zero but is clamped.
        let (current, _, _) = compute_importance(5.0, 1000.0, None, 0, &default_params());
        assert_eq!(current, 1.0);
    }

    #[test]
    fn decay_translates_in_time() {
        // With no accesses, current(t+Δ) = base·exp(−λ·(t+Δ)): computing at
        // t₁ then t₁+Δ matches a single computation over the total elapsed time.
        let p = default_params();
        let (at_ten, _, _) = compute_importance(8.0, 10.0, None, 0, &p);
        let (at_fifteen, _, _) = compute_importance(8.0, 15.0, None, 0, &p);
        let expected = at_ten * (-p.decay_rate * 5.0).exp();
        assert!((at_fifteen - expected).abs() < 1e-9);
    }

    #[test]
    fn sweep_updates_rows_and_logs() {
        use crate::engine::store::MemoryStore;
        let store = MemoryStore::open_in_memory().unwrap();
        let old_ts = (chrono::Utc::now() - chrono::Duration::days(14))
            .format(crate::atoms::types::TS_FORMAT)
            .to_string();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO memory_units (id, summary, base_importance, current_importance,
                                           last_decay_at, is_active, created_at)
                 VALUES ('m1', 'two weeks old', 5.0, 5.0, ?1, 1, ?1)",
                params![old_ts],
            )
            .unwrap();
        }

        let updated = run_decay_update(&store, &default_params()).unwrap();
        assert_eq!(updated, 1);

        let mem = store.get_memory("m1").unwrap().unwrap();
        assert!((mem.current_importance - 2.48).abs() < 0.02);
        assert!(mem.current_importance >= 1.0);

        let log = decay_log(&store, Some("m1")).unwrap();
        assert_eq!(log.len(), 1);
        assert!((log[0].old_importance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sweep_archives_faded_old_memories() {
        use crate::engine::store::MemoryStore;
        let store = MemoryStore::open_in_memory().unwrap();
        let ancient = (chrono::Utc::now() - chrono::Duration::days(120))
            .format(crate::atoms::types::TS_FORMAT)
            .to_string();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO memory_units (id, summary, base_importance, current_importance,
                                           last_decay_at, is_active, created_at)
                 VALUES ('old', 'stale', 2.0, 2.0, ?1, 1, ?1)",
                params![ancient],
            )
            .unwrap();
        }

        run_decay_update(&store, &default_params()).unwrap();
        let mem = store.get_memory("old").unwrap().unwrap();
        assert!(!mem.is_active, "faded 120-day-old memory should be archived");
    }
}
