// ── Recall Engine: Contradiction Detector ──────────────────────────────────
//
// Two detection passes run before every memory insert:
//
//   Pass A — identity guard. A cheap regex check that catches the user
//   renaming themselves, which embedding similarity alone misses.
//   Pass B — semantic pass. Embedding-similar active memories are checked
//   for structured-fact conflicts (same subject+predicate, different
//   object) and near-duplicate summaries (potential updates).
//
// Resolution strategy selection is a fixed rule order: temporal beats tier
// hierarchy beats confidence gap; anything undecided stays pending and both
// memories coexist.

use crate::atoms::constants::{CONFIDENCE_GAP, CONTRADICTION_CANDIDATES, IDENTITY_GUARD_WINDOW, POTENTIAL_UPDATE_SIMILARITY};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{BeliefTier, MemoryProposal, MemoryUnit, Temporal};
use crate::engine::store::cosine_similarity;
use crate::engine::store::memories::{active_memories_conn, memory_from_row};
use crate::engine::tiering;
use log::info;
use regex::Regex;
use rusqlite::{params, Connection};
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════
// Conflict model
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Identity,
    Fact,
    PotentialUpdate,
}

/// What the write pipeline should do about a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// The incoming memory supersedes the existing one.
    NewSupersedes,
    /// The existing memory wins; the incoming one is inserted inactive.
    ExistingSupersedes,
    /// Undecided — record a pending contradiction, keep both active.
    Pending,
}

/// Which ordered rule produced the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    Temporal,
    TierHierarchy,
    Confidence,
    Coexist,
    Merge,
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub existing_id: String,
    pub kind: ConflictKind,
    pub field_path: Option<String>,
    pub reason: String,
    pub similarity: f64,
    pub action: ConflictAction,
    pub strategy: ResolutionStrategy,
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity guard (Pass A)
// ═══════════════════════════════════════════════════════════════════════════

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)user'?s name is (\w+)",
        r"(?i)my name is (\w+)",
        r"(?i)\bi am (\w+)",
        r"(?i)call me (\w+)",
        r"(?i)(\w+) introduces",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("name pattern"))
    .collect()
});

const NAME_STOPWORDS: &[&str] = &["user", "asking", "the", "a", "an", "here", "there"];

/// Pull a user name out of free text using the ordered pattern list.
pub fn extract_user_name(text: &str) -> Option<String> {
    for pattern in NAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let name = caps.get(1)?.as_str();
            if !NAME_STOPWORDS.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn identity_text(summary: &str, facts: &[String]) -> String {
    let mut text = summary.to_string();
    for fact in facts {
        text.push(' ');
        text.push_str(fact);
    }
    text
}

fn identity_pass(conn: &Connection, proposal: &MemoryProposal) -> EngineResult<Vec<Conflict>> {
    let Some(new_name) = extract_user_name(&identity_text(&proposal.summary, &proposal.facts))
    else {
        return Ok(Vec::new());
    };

    let columns = crate::engine::store::memories::MEMORY_COLUMNS;
    let sql = format!(
        "SELECT {columns} FROM memory_units
         WHERE is_active = 1
           AND (summary LIKE '%name is%' OR summary LIKE '%I am%'
                OR summary LIKE '%introduces%' OR facts LIKE '%name is%')
         ORDER BY created_at DESC, id LIMIT {IDENTITY_GUARD_WINDOW}"
    );
    let recent: Vec<MemoryUnit> = {
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<MemoryUnit> = stmt
            .query_map(params![], memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };

    let mut conflicts = Vec::new();
    for mem in recent {
        let Some(existing_name) = extract_user_name(&identity_text(&mem.summary, &mem.facts))
        else {
            continue;
        };
        if !existing_name.eq_ignore_ascii_case(&new_name) {
            info!(
                "[contradiction] Identity conflict: '{}' vs '{}'",
                existing_name, new_name
            );
            conflicts.push(Conflict {
                existing_id: mem.id.clone(),
                kind: ConflictKind::Identity,
                field_path: Some("user.name".to_string()),
                reason: format!(
                    "identity conflict: stored name '{}' differs from new name '{}'",
                    existing_name, new_name
                ),
                similarity: 0.95,
                action: ConflictAction::NewSupersedes,
                strategy: ResolutionStrategy::Temporal,
            });
        }
    }
    Ok(conflicts)
}

// ═══════════════════════════════════════════════════════════════════════════
// Resolution rule order
// ═══════════════════════════════════════════════════════════════════════════

/// Ordered rules; the first that applies wins.
pub fn select_resolution(
    new_temporal: Option<Temporal>,
    existing_temporal: Option<Temporal>,
    new_tier: BeliefTier,
    existing_tier: BeliefTier,
    new_confidence: f32,
    existing_confidence: f32,
) -> (ConflictAction, ResolutionStrategy) {
    // 1. Temporal: a current fact replaces a past one.
    if new_temporal == Some(Temporal::Current) && existing_temporal == Some(Temporal::Past) {
        return (ConflictAction::NewSupersedes, ResolutionStrategy::Temporal);
    }

    // 2. Tier hierarchy: higher authority wins.
    let new_priority = tiering::priority(new_tier);
    let existing_priority = tiering::priority(existing_tier);
    if new_priority > existing_priority {
        return (ConflictAction::NewSupersedes, ResolutionStrategy::TierHierarchy);
    }
    if existing_priority > new_priority {
        return (ConflictAction::ExistingSupersedes, ResolutionStrategy::TierHierarchy);
    }

    // 3. Confidence gap.
    let gap = new_confidence - existing_confidence;
    if gap.abs() > CONFIDENCE_GAP {
        return if gap > 0.0 {
            (ConflictAction::NewSupersedes, ResolutionStrategy::Confidence)
        } else {
            (ConflictAction::ExistingSupersedes, ResolutionStrategy::Confidence)
        };
    }

    // 4. Undecided: record and keep both.
    (ConflictAction::Pending, ResolutionStrategy::Coexist)
}

// ═══════════════════════════════════════════════════════════════════════════
// Semantic pass (Pass B)
// ═══════════════════════════════════════════════════════════════════════════

fn semantic_pass(
    conn: &Connection,
    proposal: &MemoryProposal,
    embedding: &[f32],
    threshold: f64,
) -> EngineResult<Vec<Conflict>> {
    let mut scored: Vec<(f64, MemoryUnit)> = active_memories_conn(conn)?
        .into_iter()
        .filter_map(|mem| {
            let emb = mem.embedding.as_ref()?;
            let cosine = cosine_similarity(embedding, emb);
            (cosine > threshold).then_some((cosine, mem))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored.truncate(CONTRADICTION_CANDIDATES);

    let mut conflicts = Vec::new();
    for (cosine, mem) in scored {
        // Structured facts matching on (subject, predicate) but differing
        // on object flag an explicit fact conflict.
        for new_fact in &proposal.structured_facts {
            for old_fact in &mem.structured_facts {
                let same_slot = new_fact.subject.eq_ignore_ascii_case(&old_fact.subject)
                    && new_fact.predicate.eq_ignore_ascii_case(&old_fact.predicate);
                if same_slot && !new_fact.object.eq_ignore_ascii_case(&old_fact.object) {
                    let (action, strategy) = select_resolution(
                        Some(new_fact.temporal),
                        Some(old_fact.temporal),
                        proposal.tier,
                        mem.tier,
                        proposal.confidence,
                        mem.confidence,
                    );
                    conflicts.push(Conflict {
                        existing_id: mem.id.clone(),
                        kind: ConflictKind::Fact,
                        field_path: Some(format!("{}.{}", new_fact.subject, new_fact.predicate)),
                        reason: format!(
                            "fact conflict on {}.{}: '{}' vs '{}'",
                            new_fact.subject, new_fact.predicate, old_fact.object, new_fact.object
                        ),
                        similarity: cosine,
                        action,
                        strategy,
                    });
                }
            }
        }

        // Overlapping entities + near-identical summaries that still differ
        // suggest the new memory is an update of the old one.
        let entity_overlap = proposal.entities.iter().any(|e| {
            mem.entities.iter().any(|o| o.eq_ignore_ascii_case(e))
        });
        if entity_overlap
            && cosine > POTENTIAL_UPDATE_SIMILARITY
            && proposal.summary.trim() != mem.summary.trim()
        {
            let (action, strategy) = select_resolution(
                None,
                None,
                proposal.tier,
                mem.tier,
                proposal.confidence,
                mem.confidence,
            );
            conflicts.push(Conflict {
                existing_id: mem.id.clone(),
                kind: ConflictKind::PotentialUpdate,
                field_path: None,
                reason: format!("potential update of '{}'", mem.summary),
                similarity: cosine,
                action,
                strategy,
            });
        }
    }
    Ok(conflicts)
}

// ═══════════════════════════════════════════════════════════════════════════
// Entry point
// ═══════════════════════════════════════════════════════════════════════════

/// Run both passes plus extractor-supplied hints. Called by the write
/// pipeline inside its transaction, before the new row exists.
pub fn detect_conflicts(
    conn: &Connection,
    proposal: &MemoryProposal,
    embedding: &[f32],
    threshold: f64,
) -> EngineResult<Vec<Conflict>> {
    let mut conflicts = identity_pass(conn, proposal)?;
    conflicts.extend(semantic_pass(conn, proposal, embedding, threshold)?);

    // Extractor hints reference memories by id; trust the suggestion when
    // it parses, otherwise leave the conflict pending.
    for hint in &proposal.contradicts {
        if crate::engine::store::memories::get_memory_conn(conn, &hint.memory_id)?
            .map(|m| m.is_active)
            .unwrap_or(false)
        {
            let action = match hint.suggested_resolution.as_deref() {
                Some("a_supersedes") => ConflictAction::NewSupersedes,
                Some("b_supersedes") => ConflictAction::ExistingSupersedes,
                _ => ConflictAction::Pending,
            };
            conflicts.push(Conflict {
                existing_id: hint.memory_id.clone(),
                kind: ConflictKind::PotentialUpdate,
                field_path: None,
                reason: hint.reason.clone(),
                similarity: 0.9,
                action,
                strategy: if action == ConflictAction::Pending {
                    ResolutionStrategy::Coexist
                } else {
                    ResolutionStrategy::Merge
                },
            });
        }
    }

    Ok(conflicts)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::StructuredFact;
    use crate::engine::store::{embedding_to_blob, MemoryStore};
    use crate::atoms::types::now_ts;

    #[test]
    fn name_extraction_patterns() {
        assert_eq!(extract_user_name("My name is Costa"), Some("Costa".into()));
        assert_eq!(extract_user_name("user's name is Alex"), Some("Alex".into()));
        assert_eq!(extract_user_name("call me Maria please"), Some("Maria".into()));
        assert_eq!(extract_user_name("I am Dimitris"), Some("Dimitris".into()));
        assert_eq!(extract_user_name("no names in this sentence"), None);
    }

    #[test]
    fn name_stopwords_rejected() {
        assert_eq!(extract_user_name("I am here"), None);
        assert_eq!(extract_user_name("the user introduces nothing"), None);
    }

    #[test]
    fn temporal_rule_fires_first() {
        let (action, strategy) = select_resolution(
            Some(Temporal::Current),
            Some(Temporal::Past),
            BeliefTier::Hypothesis, // even a lower tier wins on temporality
            BeliefTier::AssertedFact,
            0.4,
            0.95,
        );
        assert_eq!(action, ConflictAction::NewSupersedes);
        assert_eq!(strategy, ResolutionStrategy::Temporal);
    }

    #[test]
    fn tier_hierarchy_rule() {
        let (action, strategy) = select_resolution(
            None,
            None,
            BeliefTier::AssertedFact,
            BeliefTier::Hypothesis,
            0.92,
            0.45,
        );
        assert_eq!(action, ConflictAction::NewSupersedes);
        assert_eq!(strategy, ResolutionStrategy::TierHierarchy);

        let (action, _) = select_resolution(
            None,
            None,
            BeliefTier::Hypothesis,
            BeliefTier::ObservedFact,
            0.45,
            0.8,
        );
        assert_eq!(action, ConflictAction::ExistingSupersedes);
    }

    #[test]
    fn confidence_gap_rule() {
        let (action, strategy) = select_resolution(
            None,
            None,
            BeliefTier::ObservedFact,
            BeliefTier::ObservedFact,
            0.99,
            0.70,
        );
        assert_eq!(action, ConflictAction::NewSupersedes);
        assert_eq!(strategy, ResolutionStrategy::Confidence);
    }

    #[test]
    fn default_is_pending_coexist() {
        let (action, strategy) = select_resolution(
            None,
            None,
            BeliefTier::ObservedFact,
            BeliefTier::ObservedFact,
            0.85,
            0.80,
        );
        assert_eq!(action, ConflictAction::Pending);
        assert_eq!(strategy, ResolutionStrategy::Coexist);
    }

    fn seed(store: &MemoryStore, id: &str, summary: &str, facts_json: &str, emb: &[f32]) {
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO memory_units (id, summary, structured_facts, base_importance,
                                       current_importance, last_decay_at, embedding,
                                       tier, confidence, is_active, created_at)
             VALUES (?1, ?2, ?3, 5.0, 5.0, ?4, ?5, 'asserted_fact', 0.95, 1, ?4)",
            rusqlite::params![id, summary, facts_json, now_ts(), embedding_to_blob(emb)],
        )
        .unwrap();
    }

    #[test]
    fn identity_guard_flags_renamed_user() {
        let store = MemoryStore::open_in_memory().unwrap();
        seed(&store, "m-costa", "User's name is Costa.", "[]", &[1.0, 0.0]);

        let proposal = MemoryProposal {
            should_write: true,
            summary: "User's name is Alex.".into(),
            tier: BeliefTier::AssertedFact,
            confidence: 0.95,
            ..Default::default()
        };
        let conn = store.conn.lock();
        // Orthogonal embedding: the identity guard must not depend on
        // vector similarity.
        let conflicts = detect_conflicts(&conn, &proposal, &[0.0, 1.0], 0.75).unwrap();

        let identity: Vec<&Conflict> = conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Identity)
            .collect();
        assert_eq!(identity.len(), 1);
        assert_eq!(identity[0].existing_id, "m-costa");
        assert_eq!(identity[0].action, ConflictAction::NewSupersedes);
        assert!((identity[0].similarity - 0.95).abs() < 1e-9);
    }

    #[test]
    fn same_name_is_not_a_conflict() {
        let store = MemoryStore::open_in_memory().unwrap();
        seed(&store, "m-costa", "User's name is Costa.", "[]", &[1.0, 0.0]);

        let proposal = MemoryProposal {
            should_write: true,
            summary: "User's name is costa.".into(),
            tier: BeliefTier::AssertedFact,
            confidence: 0.95,
            ..Default::default()
        };
        let conn = store.conn.lock();
        let conflicts = detect_conflicts(&conn, &proposal, &[0.0, 1.0], 0.75).unwrap();
        assert!(conflicts.iter().all(|c| c.kind != ConflictKind::Identity));
    }

    #[test]
    fn fact_conflict_on_same_subject_predicate() {
        let store = MemoryStore::open_in_memory().unwrap();
        let facts = serde_json::to_string(&vec![StructuredFact {
            subject: "user".into(),
            predicate: "lives_in".into(),
            object: "Athens".into(),
            confidence: 0.9,
            temporal: Temporal::Past,
        }])
        .unwrap();
        seed(&store, "m-loc", "User lives in Athens.", &facts, &[1.0, 0.0]);

        let proposal = MemoryProposal {
            should_write: true,
            summary: "User lives in Berlin now.".into(),
            tier: BeliefTier::AssertedFact,
            confidence: 0.95,
            structured_facts: vec![StructuredFact {
                subject: "User".into(),
                predicate: "LIVES_IN".into(),
                object: "Berlin".into(),
                confidence: 0.9,
                temporal: Temporal::Current,
            }],
            ..Default::default()
        };
        let conn = store.conn.lock();
        let conflicts = detect_conflicts(&conn, &proposal, &[1.0, 0.0], 0.75).unwrap();

        let fact: Vec<&Conflict> = conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Fact)
            .collect();
        assert_eq!(fact.len(), 1);
        assert_eq!(fact[0].field_path.as_deref(), Some("User.LIVES_IN"));
        // current-vs-past resolves temporally in favor of the new fact
        assert_eq!(fact[0].action, ConflictAction::NewSupersedes);
        assert_eq!(fact[0].strategy, ResolutionStrategy::Temporal);
    }
}
