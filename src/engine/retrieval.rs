// ── Recall Engine: Graph Retrieval ─────────────────────────────────────────
//
// Hybrid retrieval in three steps:
//   1. Candidate scoring — 0.6·cosine + 0.2·text_rank + 0.2·importance/10
//      over active memories above the similarity threshold; top 2k form the
//      frontier.
//   2. Spreading activation — follow relations outward from the frontier,
//      adding cosine·weight·decay to each neighbor; the decay factor is
//      squared at every level so influence attenuates geometrically.
//      Multi-path hits accumulate score and activation sources.
//   3. Select the final top k. Ties break on memory id so output order is
//      deterministic for identical data.
//
// Callers reinforce the returned ids afterwards (access bump is a separate
// short transaction, not part of the read).

use crate::atoms::constants::{RELATION_DISCOVERY_LIMIT, RELATION_OVERLAP_THRESHOLD};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{MemoryUnit, RetrievedMemory};
use crate::engine::embedding::EmbeddingClient;
use crate::engine::store::memories::{active_memories_conn, text_rank_conn};
use crate::engine::store::relations::{neighbors_conn, upsert_relation_conn};
use crate::engine::store::{cosine_similarity, MemoryStore};
use log::info;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Retrieval tunables, resolved from the environment at startup.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub k: usize,
    pub depth: usize,
    pub spread_decay: f64,
    pub similarity_threshold: f64,
}

/// Hybrid base score weights.
const W_VECTOR: f64 = 0.6;
const W_TEXT: f64 = 0.2;
const W_IMPORTANCE: f64 = 0.2;

/// Embed the query, then score. The convenience entry point for callers
/// that do not already hold a query vector.
pub async fn retrieve(
    store: &MemoryStore,
    embedder: &EmbeddingClient,
    query: &str,
    params: &RetrievalParams,
) -> EngineResult<Vec<RetrievedMemory>> {
    let query_embedding = embedder.embed(query).await?;
    retrieve_with_embedding(store, &query_embedding, query, params, &[])
}

/// Core retrieval against a precomputed query embedding. `exclude` removes
/// ids from consideration entirely (the orchestrator passes the current
/// turn's instant-write ids so they are not visible until the next turn).
pub fn retrieve_with_embedding(
    store: &MemoryStore,
    query_embedding: &[f32],
    query_text: &str,
    params: &RetrievalParams,
    exclude: &[String],
) -> EngineResult<Vec<RetrievedMemory>> {
    let conn = store.conn.lock();
    let excluded: HashSet<&str> = exclude.iter().map(|s| s.as_str()).collect();

    let active = active_memories_conn(&conn)?;
    let text_ranks = text_rank_conn(&conn, query_text)?;
    let max_rank = text_ranks.values().cloned().fold(0.0f64, f64::max);

    let by_id: HashMap<&str, &MemoryUnit> = active.iter().map(|m| (m.id.as_str(), m)).collect();

    let base_score = |mem: &MemoryUnit, cosine: f64| -> f64 {
        let text = if max_rank > 0.0 {
            text_ranks.get(&mem.id).cloned().unwrap_or(0.0) / max_rank
        } else {
            0.0
        };
        W_VECTOR * cosine + W_TEXT * text + W_IMPORTANCE * (mem.current_importance / 10.0)
    };

    // ── Step 1: candidate scoring ────────────────────────────────────────
    let mut scores: HashMap<String, (f64, Vec<String>)> = HashMap::new();
    let mut candidates: Vec<(String, f64)> = Vec::new();
    for mem in &active {
        if excluded.contains(mem.id.as_str()) {
            continue;
        }
        let Some(embedding) = &mem.embedding else { continue };
        let cosine = cosine_similarity(query_embedding, embedding);
        if cosine < params.similarity_threshold {
            continue;
        }
        candidates.push((mem.id.clone(), base_score(mem, cosine)));
    }
    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    candidates.truncate(params.k.saturating_mul(2));

    let mut frontier: Vec<String> = Vec::new();
    for (id, score) in &candidates {
        scores.insert(id.clone(), (*score, vec!["direct".to_string()]));
        frontier.push(id.clone());
    }

    // ── Step 2: spreading activation ─────────────────────────────────────
    // Spread flows only to memories not already in the frontier; within one
    // level, multiple paths into the same memory sum their contributions
    // and accumulate activation sources.
    let mut reached: HashSet<String> = frontier.iter().cloned().collect();
    let mut level = frontier;
    let mut factor = params.spread_decay;
    for _ in 0..params.depth {
        if level.is_empty() {
            break;
        }
        let mut newly_reached: Vec<String> = Vec::new();
        for id in &level {
            for (neighbor, relation_type, weight) in neighbors_conn(&conn, id)? {
                if excluded.contains(neighbor.as_str()) || reached.contains(&neighbor) {
                    continue;
                }
                let Some(mem) = by_id.get(neighbor.as_str()) else { continue };
                let Some(embedding) = &mem.embedding else { continue };
                let cosine = cosine_similarity(query_embedding, embedding);
                let spread = cosine * weight * factor;
                let source = format!("spread_{}", relation_type);

                match scores.get_mut(&neighbor) {
                    Some((score, sources)) => {
                        *score += spread;
                        sources.push(source);
                    }
                    None => {
                        scores.insert(
                            neighbor.clone(),
                            (base_score(mem, cosine) + spread, vec![source]),
                        );
                        newly_reached.push(neighbor);
                    }
                }
            }
        }
        for id in &newly_reached {
            reached.insert(id.clone());
        }
        level = newly_reached;
        factor *= factor;
    }

    // ── Step 3: final top k ──────────────────────────────────────────────
    let mut ranked: Vec<(String, f64, Vec<String>)> = scores
        .into_iter()
        .map(|(id, (score, sources))| (id, score, sources))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(params.k);

    let results: Vec<RetrievedMemory> = ranked
        .into_iter()
        .filter_map(|(id, score, sources)| {
            by_id.get(id.as_str()).map(|mem| RetrievedMemory {
                memory: (*mem).clone(),
                combined_score: score,
                activation_sources: sources,
            })
        })
        .collect();

    info!(
        "[retrieval] {} results for '{}' (threshold {:.2}, depth {})",
        results.len(),
        &query_text[..query_text.len().min(60)],
        params.similarity_threshold,
        params.depth,
    );
    Ok(results)
}

// ═══════════════════════════════════════════════════════════════════════════
// Relation auto-discovery
// ═══════════════════════════════════════════════════════════════════════════

/// After a memory insert, connect it to active memories that share entities.
/// Overlap = |A∩B| / max(|A|,|B|); at or above the threshold a bidirectional
/// `related_to` edge is upserted with weight = overlap. At most
/// RELATION_DISCOVERY_LIMIT candidates are examined.
pub fn discover_relations(
    conn: &Connection,
    memory_id: &str,
    entities: &[String],
) -> EngineResult<usize> {
    if entities.is_empty() {
        return Ok(0);
    }
    let own: HashSet<String> = entities.iter().map(|e| e.to_lowercase()).collect();

    let mut created = 0usize;
    let mut examined = 0usize;
    for other in active_memories_conn(conn)? {
        if other.id == memory_id || other.entities.is_empty() {
            continue;
        }
        let theirs: HashSet<String> = other.entities.iter().map(|e| e.to_lowercase()).collect();
        let shared = own.intersection(&theirs).count();
        if shared == 0 {
            continue;
        }
        examined += 1;
        let overlap = shared as f64 / own.len().max(theirs.len()) as f64;
        if overlap >= RELATION_OVERLAP_THRESHOLD {
            upsert_relation_conn(conn, memory_id, &other.id, "related_to", overlap, true)?;
            created += 1;
        }
        if examined >= RELATION_DISCOVERY_LIMIT {
            break;
        }
    }
    Ok(created)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::now_ts;
    use crate::engine::store::embedding_to_blob;
    use rusqlite::params;

    fn seed_memory(
        store: &MemoryStore,
        id: &str,
        summary: &str,
        embedding: &[f32],
        importance: f64,
        active: bool,
    ) {
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO memory_units (id, summary, base_importance, current_importance,
                                       last_decay_at, embedding, is_active, created_at)
             VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?4)",
            params![
                id,
                summary,
                importance,
                now_ts(),
                embedding_to_blob(embedding),
                active as i64
            ],
        )
        .unwrap();
    }

    fn relate(store: &MemoryStore, a: &str, b: &str, weight: f64) {
        store.upsert_relation(a, b, "related_to", weight, true).unwrap();
    }

    /// Unit vector at an angle in the xy plane, so cosines against the
    /// x axis are exact.
    fn unit(cos: f32) -> Vec<f32> {
        let sin = (1.0 - cos * cos).sqrt();
        vec![cos, sin, 0.0]
    }

    fn base_params() -> RetrievalParams {
        RetrievalParams {
            k: 3,
            depth: 2,
            spread_decay: 0.5,
            similarity_threshold: 0.3,
        }
    }

    #[test]
    fn spreading_activation_orders_chain() {
        // A↔B (0.8), B↔C (0.6); query cosines 0.9 / 0.1 / 0.05.
        // Only A clears the 0.3 threshold; B arrives via depth-1 spread
        // (0.1·0.8·0.5 = 0.04), C via depth-2 (0.05·0.6·0.25 = 0.0075).
        let store = MemoryStore::open_in_memory().unwrap();
        seed_memory(&store, "a", "alpha topic", &unit(0.9), 5.0, true);
        seed_memory(&store, "b", "beta topic", &unit(0.1), 5.0, true);
        seed_memory(&store, "c", "gamma topic", &unit(0.05), 5.0, true);
        relate(&store, "a", "b", 0.8);
        relate(&store, "b", "c", 0.6);

        let query = vec![1.0f32, 0.0, 0.0];
        let results =
            retrieve_with_embedding(&store, &query, "unrelated words", &base_params(), &[])
                .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].memory.id, "a");
        assert_eq!(results[1].memory.id, "b");
        assert_eq!(results[2].memory.id, "c");

        assert!(results[0].activation_sources.contains(&"direct".to_string()));
        assert!(results[1]
            .activation_sources
            .contains(&"spread_related_to".to_string()));

        // A keeps its pure base score (no back-spread into the frontier).
        let a_base = 0.6 * 0.9 + 0.2 * (5.0 / 10.0);
        assert!((results[0].combined_score - a_base).abs() < 1e-3);
        // B's score is its base plus the depth-1 spread contribution.
        let b_base = 0.6 * 0.1 + 0.2 * (5.0 / 10.0);
        assert!((results[1].combined_score - (b_base + 0.04)).abs() < 1e-3);
        // C's spread arrived with the squared decay factor.
        let c_base = 0.6 * 0.05 + 0.2 * (5.0 / 10.0);
        assert!((results[2].combined_score - (c_base + 0.0075)).abs() < 1e-3);
    }

    #[test]
    fn results_are_active_only() {
        let store = MemoryStore::open_in_memory().unwrap();
        seed_memory(&store, "live", "active memory", &unit(0.9), 5.0, true);
        seed_memory(&store, "dead", "inactive memory", &unit(0.95), 5.0, false);

        let query = vec![1.0f32, 0.0, 0.0];
        let results =
            retrieve_with_embedding(&store, &query, "memory", &base_params(), &[]).unwrap();
        assert!(results.iter().all(|r| r.memory.is_active));
        assert!(results.iter().all(|r| r.memory.id != "dead"));
    }

    #[test]
    fn excluded_ids_are_invisible() {
        let store = MemoryStore::open_in_memory().unwrap();
        seed_memory(&store, "m1", "fresh instant write", &unit(0.99), 5.0, true);
        let query = vec![1.0f32, 0.0, 0.0];

        let visible =
            retrieve_with_embedding(&store, &query, "fresh", &base_params(), &[]).unwrap();
        assert_eq!(visible.len(), 1);

        let hidden = retrieve_with_embedding(
            &store,
            &query,
            "fresh",
            &base_params(),
            &["m1".to_string()],
        )
        .unwrap();
        assert!(hidden.is_empty());
    }

    #[test]
    fn retrieval_is_deterministic() {
        let store = MemoryStore::open_in_memory().unwrap();
        for i in 0..6 {
            seed_memory(&store, &format!("m{i}"), "same summary", &unit(0.8), 5.0, true);
        }
        let query = vec![1.0f32, 0.0, 0.0];
        let first =
            retrieve_with_embedding(&store, &query, "same", &base_params(), &[]).unwrap();
        let second =
            retrieve_with_embedding(&store, &query, "same", &base_params(), &[]).unwrap();
        let ids = |rs: &[RetrievedMemory]| -> Vec<String> {
            rs.iter().map(|r| r.memory.id.clone()).collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn discovery_links_entity_overlap() {
        let store = MemoryStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO memory_units (id, summary, entities, base_importance,
                                       current_importance, last_decay_at, is_active, created_at)
             VALUES ('x', 'about rust and tokio', '[\"Rust\",\"Tokio\"]', 5.0, 5.0, ?1, 1, ?1)",
            params![now_ts()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO memory_units (id, summary, entities, base_importance,
                                       current_importance, last_decay_at, is_active, created_at)
             VALUES ('y', 'more rust talk', '[\"rust\"]', 5.0, 5.0, ?1, 1, ?1)",
            params![now_ts()],
        )
        .unwrap();

        // overlap = 1 / max(2,1) = 0.5 ≥ 0.3 → edge created
        let created = discover_relations(&conn, "y", &["rust".to_string()]).unwrap();
        assert_eq!(created, 1);

        let edge: f64 = conn
            .query_row(
                "SELECT weight FROM relations WHERE source_id = 'y' AND target_id = 'x'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!((edge - 0.5).abs() < 1e-9);
    }
}
