// End-to-end tests for the memory engine against an in-memory store.
// Embeddings are synthetic unit vectors so no model server is needed.

use recall::atoms::types::{
    BeliefTier, MemoryProposal, StructuredFact, Temporal, Valence,
};
use recall::engine::instant::extract_instant;
use recall::engine::retrieval::{retrieve_with_embedding, RetrievalParams};
use recall::{MemoryStore, Resolution};

const THRESHOLD: f64 = 0.75;

fn unit(x: f32, y: f32) -> Vec<f32> {
    let norm = (x * x + y * y).sqrt();
    vec![x / norm, y / norm, 0.0]
}

fn retrieval_params() -> RetrievalParams {
    RetrievalParams {
        k: 5,
        depth: 2,
        spread_decay: 0.5,
        similarity_threshold: 0.3,
    }
}

// ── S1: name capture ───────────────────────────────────────────────────────

#[test]
fn name_capture_is_invisible_same_turn_visible_next() {
    let store = MemoryStore::open_in_memory().unwrap();

    let proposals = extract_instant("My name is Costa");
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].summary, "User's name is Costa.");
    assert_eq!(proposals[0].tier, BeliefTier::AssertedFact);
    assert!((proposals[0].confidence - 0.95).abs() < 1e-6);

    let report = store
        .insert_memory_unit(&proposals[0], unit(1.0, 0.0), THRESHOLD)
        .unwrap();

    // Same turn: the instant write is excluded from retrieval.
    let query = unit(1.0, 0.0);
    let same_turn = retrieve_with_embedding(
        &store,
        &query,
        "Who am I?",
        &retrieval_params(),
        &[report.memory_id.clone()],
    )
    .unwrap();
    assert!(same_turn.is_empty());

    // Next turn: no exclusion, the memory ranks in the top-k.
    let next_turn =
        retrieve_with_embedding(&store, &query, "Who am I?", &retrieval_params(), &[]).unwrap();
    assert_eq!(next_turn.len(), 1);
    assert_eq!(next_turn[0].memory.id, report.memory_id);
}

// ── S2: preference pair ────────────────────────────────────────────────────

#[test]
fn love_hate_pair_produces_two_active_preferences() {
    let store = MemoryStore::open_in_memory().unwrap();

    let proposals = extract_instant("I love rock music and hate country");
    assert_eq!(proposals.len(), 2);
    for (i, p) in proposals.iter().enumerate() {
        store
            .insert_memory_unit(p, unit(1.0, i as f32), THRESHOLD)
            .unwrap();
    }

    let prefs = store.user_preferences(None, None).unwrap();
    assert_eq!(prefs.len(), 2);

    let rock = prefs.iter().find(|p| p.entity == "rock music").unwrap();
    assert_eq!(rock.valence, Valence::Positive);
    assert!(rock.strength >= 0.85);
    assert!(rock.is_active);

    let country = prefs.iter().find(|p| p.entity == "country").unwrap();
    assert_eq!(country.valence, Valence::Negative);
    assert!(country.strength >= 0.7);
    assert!(country.is_active);
}

#[test]
fn preference_updates_supersede_prior_rows() {
    let store = MemoryStore::open_in_memory().unwrap();

    for (turn, text) in ["I love coffee", "I can't stand coffee"].iter().enumerate() {
        let proposals = extract_instant(text);
        assert_eq!(proposals.len(), 1, "text: {text}");
        store
            .insert_memory_unit(&proposals[0], unit(1.0, turn as f32), THRESHOLD)
            .unwrap();
    }

    let active = store.user_preferences(Some("coffee"), None).unwrap();
    assert_eq!(active.len(), 1, "only the newest preference stays active");
    assert_eq!(active[0].valence, Valence::Negative);

    // The superseded row still exists, inactive, pointing at its successor.
    let conn = store.conn.lock();
    let (inactive_count, superseded_by): (i64, Option<String>) = conn
        .query_row(
            "SELECT COUNT(*), MAX(superseded_by) FROM preferences
             WHERE entity = 'coffee' AND is_active = 0",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(inactive_count, 1);
    assert_eq!(superseded_by.as_deref(), Some(active[0].id.as_str()));
}

// ── S3: identity contradiction ─────────────────────────────────────────────

#[test]
fn renaming_supersedes_the_old_identity() {
    let store = MemoryStore::open_in_memory().unwrap();

    let costa = &extract_instant("My name is Costa")[0];
    let costa_report = store
        .insert_memory_unit(costa, unit(1.0, 0.0), THRESHOLD)
        .unwrap();

    let alex = &extract_instant("Actually, my name is Alex")[0];
    // Orthogonal embedding: identity detection must not rely on similarity.
    let alex_report = store
        .insert_memory_unit(alex, unit(0.0, 1.0), THRESHOLD)
        .unwrap();

    let old = store.get_memory(&costa_report.memory_id).unwrap().unwrap();
    assert!(!old.is_active, "the Costa memory must be deactivated");

    let new = store.get_memory(&alex_report.memory_id).unwrap().unwrap();
    assert!(new.is_active);
    assert!(new.supersedes.contains(&costa_report.memory_id));

    // Auto-resolved: nothing pending.
    assert!(store.pending_contradictions().unwrap().is_empty());
}

#[test]
fn supersession_soundness_invariant() {
    let store = MemoryStore::open_in_memory().unwrap();
    let costa = &extract_instant("My name is Costa")[0];
    store.insert_memory_unit(costa, unit(1.0, 0.0), THRESHOLD).unwrap();
    let alex = &extract_instant("My name is Alex")[0];
    store.insert_memory_unit(alex, unit(0.0, 1.0), THRESHOLD).unwrap();

    // No active memory may reference an active memory in supersedes.
    let all = store.all_memories(true).unwrap();
    for mem in all.iter().filter(|m| m.is_active) {
        for superseded in &mem.supersedes {
            let target = store.get_memory(superseded).unwrap().unwrap();
            assert!(
                !target.is_active,
                "active memory {} supersedes active {}",
                mem.id, target.id
            );
        }
    }
}

// ── Fact conflicts ─────────────────────────────────────────────────────────

fn location_proposal(object: &str, temporal: Temporal) -> MemoryProposal {
    MemoryProposal {
        should_write: true,
        summary: format!("User lives in {object}."),
        tier: BeliefTier::AssertedFact,
        confidence: 0.95,
        entities: vec![object.to_string()],
        structured_facts: vec![StructuredFact {
            subject: "user".into(),
            predicate: "lives_in".into(),
            object: object.to_string(),
            confidence: 0.9,
            temporal,
        }],
        importance: 7.0,
        ..Default::default()
    }
}

#[test]
fn current_fact_supersedes_past_fact() {
    let store = MemoryStore::open_in_memory().unwrap();

    let athens = location_proposal("Athens", Temporal::Past);
    let athens_report = store
        .insert_memory_unit(&athens, unit(1.0, 0.0), THRESHOLD)
        .unwrap();

    // Similar embedding so the semantic pass picks the old memory up.
    let berlin = location_proposal("Berlin", Temporal::Current);
    let berlin_report = store
        .insert_memory_unit(&berlin, unit(1.0, 0.1), THRESHOLD)
        .unwrap();

    let old = store.get_memory(&athens_report.memory_id).unwrap().unwrap();
    assert!(!old.is_active);
    let new = store.get_memory(&berlin_report.memory_id).unwrap().unwrap();
    assert!(new.supersedes.contains(&athens_report.memory_id));
}

#[test]
fn undecidable_conflict_stays_pending_and_coexists() {
    let store = MemoryStore::open_in_memory().unwrap();

    let first = location_proposal("Athens", Temporal::Unknown);
    let first_report = store
        .insert_memory_unit(&first, unit(1.0, 0.0), THRESHOLD)
        .unwrap();

    // Same tier, same confidence, no temporal signal: nothing can decide.
    let second = location_proposal("Berlin", Temporal::Unknown);
    let second_report = store
        .insert_memory_unit(&second, unit(1.0, 0.1), THRESHOLD)
        .unwrap();

    let pending = store.pending_contradictions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].memory_a, second_report.memory_id);
    assert_eq!(pending[0].memory_b, first_report.memory_id);
    assert_eq!(pending[0].field_path.as_deref(), Some("user.lives_in"));

    // Both sides stay active until someone decides.
    assert!(store.get_memory(&first_report.memory_id).unwrap().unwrap().is_active);
    assert!(store.get_memory(&second_report.memory_id).unwrap().unwrap().is_active);

    // Manual resolution applies the supersession side effects.
    let resolved = store
        .resolve_contradiction(&pending[0].id, Resolution::ASupersedes, Some("user confirmed"))
        .unwrap();
    assert!(resolved.resolved_at.is_some());

    let loser = store.get_memory(&first_report.memory_id).unwrap().unwrap();
    assert!(!loser.is_active);
    let winner = store.get_memory(&second_report.memory_id).unwrap().unwrap();
    assert!(winner.supersedes.contains(&first_report.memory_id));
    assert!(store.pending_contradictions().unwrap().is_empty());
}

// ── Relations ──────────────────────────────────────────────────────────────

#[test]
fn shared_entities_create_relations() {
    let store = MemoryStore::open_in_memory().unwrap();

    let a = MemoryProposal {
        should_write: true,
        summary: "User works on the Apollo project.".into(),
        tier: BeliefTier::ObservedFact,
        confidence: 0.85,
        entities: vec!["Apollo".into()],
        importance: 5.0,
        ..Default::default()
    };
    let a_report = store.insert_memory_unit(&a, unit(1.0, 0.0), THRESHOLD).unwrap();

    let b = MemoryProposal {
        should_write: true,
        summary: "Apollo ships next quarter.".into(),
        tier: BeliefTier::ObservedFact,
        confidence: 0.85,
        entities: vec!["apollo".into()],
        importance: 5.0,
        ..Default::default()
    };
    let b_report = store.insert_memory_unit(&b, unit(0.0, 1.0), THRESHOLD).unwrap();
    assert!(b_report.relations_created >= 1);

    let edges = store.relations_for(&b_report.memory_id).unwrap();
    assert!(edges
        .iter()
        .any(|e| e.target_id == a_report.memory_id || e.source_id == a_report.memory_id));
}

#[test]
fn relation_weight_max_merges() {
    let store = MemoryStore::open_in_memory().unwrap();
    store.upsert_relation("a", "b", "related_to", 0.4, true).unwrap();
    store.upsert_relation("a", "b", "related_to", 0.9, true).unwrap();
    store.upsert_relation("a", "b", "related_to", 0.2, true).unwrap();

    let conn = store.conn.lock();
    let weight: f64 = conn
        .query_row(
            "SELECT weight FROM relations WHERE source_id = 'a' AND target_id = 'b'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!((weight - 0.9).abs() < 1e-9);
}

// ── Reinforcement & invariants ─────────────────────────────────────────────

#[test]
fn reinforcement_bumps_access_monotonically() {
    let store = MemoryStore::open_in_memory().unwrap();
    let p = &extract_instant("My name is Costa")[0];
    let report = store.insert_memory_unit(p, unit(1.0, 0.0), THRESHOLD).unwrap();

    store.reinforce_memories(&[report.memory_id.clone()]).unwrap();
    store.reinforce_memories(&[report.memory_id.clone()]).unwrap();

    let mem = store.get_memory(&report.memory_id).unwrap().unwrap();
    assert_eq!(mem.access_count, 2);
    assert!(mem.last_accessed_at.is_some());
}

#[test]
fn tier_bounds_enforced_on_write() {
    let store = MemoryStore::open_in_memory().unwrap();
    let proposal = MemoryProposal {
        should_write: true,
        summary: "User might be Canadian.".into(),
        tier: BeliefTier::Hypothesis,
        confidence: 0.99, // above the hypothesis ceiling
        importance: 4.0,
        ..Default::default()
    };
    let report = store.insert_memory_unit(&proposal, unit(1.0, 0.0), THRESHOLD).unwrap();
    let mem = store.get_memory(&report.memory_id).unwrap().unwrap();
    assert!(mem.confidence <= 0.50);
    assert!(mem.confidence >= 0.30);
}

#[test]
fn non_unit_embedding_is_rejected() {
    let store = MemoryStore::open_in_memory().unwrap();
    let proposal = MemoryProposal {
        should_write: true,
        summary: "Should never be stored.".into(),
        tier: BeliefTier::ObservedFact,
        confidence: 0.8,
        importance: 5.0,
        ..Default::default()
    };
    let result = store.insert_memory_unit(&proposal, vec![3.0, 4.0], THRESHOLD);
    assert!(result.is_err());
    assert!(store.all_memories(true).unwrap().is_empty(), "rollback must leave no rows");
}

#[test]
fn stats_reflect_store_contents() {
    let store = MemoryStore::open_in_memory().unwrap();
    for p in extract_instant("My name is Costa and I love sailing") {
        store.insert_memory_unit(&p, unit(1.0, 0.0), THRESHOLD).unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_memories, 2);
    assert_eq!(stats.active_memories, 2);
    assert_eq!(stats.preferences, 1);
    assert_eq!(stats.tier_counts.get("asserted_fact"), Some(&1));
    assert_eq!(stats.tier_counts.get("preference"), Some(&1));
    assert!(stats.entities >= 1);
}
