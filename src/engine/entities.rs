// ── Recall Engine: Entity Resolver ─────────────────────────────────────────
//
// Canonicalize surface mentions into entity records. Lookup order:
//   1. explicit link from the extractor   → 0.95
//   2. case-folded canonical match        → 1.0
//   3. case-folded alias match            → 0.9
//   4. capitalized mention → new entity   → 0.7 (type inferred from surface)
//   5. otherwise unresolved               → 0.0
//
// Type inference uses surface heuristics rather than an NER model: title
// prefixes mark people, geographic suffixes mark places, corporate suffixes
// mark organizations.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    now_ts, EntityLink, EntityRecord, EntityResolution, EntityType, MemoryProposal,
    ResolutionSource,
};
use crate::engine::store::entities as entity_store;
use log::info;
use rusqlite::Connection;

// ═══════════════════════════════════════════════════════════════════════════
// Type inference
// ═══════════════════════════════════════════════════════════════════════════

const PERSON_TITLES: &[&str] = &["mr ", "mr. ", "mrs ", "mrs. ", "ms ", "ms. ", "dr ", "dr. ", "prof ", "prof. "];
const PLACE_MARKERS: &[&str] = &["city", "state", "country", "street", "avenue", "road"];
const ORG_MARKERS: &[&str] = &["inc", "corp", "llc", "ltd", "company"];

/// Guess an entity type from the mention's surface form.
pub fn infer_type(mention: &str) -> EntityType {
    let folded = mention.to_lowercase();
    if PERSON_TITLES.iter().any(|t| folded.starts_with(t)) {
        return EntityType::Person;
    }
    if PLACE_MARKERS.iter().any(|m| folded.contains(m)) {
        return EntityType::Place;
    }
    if ORG_MARKERS.iter().any(|m| folded.contains(m)) {
        return EntityType::Organization;
    }
    EntityType::Unknown
}

fn starts_uppercase(mention: &str) -> bool {
    mention.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════════

/// Resolve one mention against the entity table, creating a new entity for
/// unrecognized capitalized mentions. Runs inside the caller's transaction.
pub fn resolve(
    conn: &Connection,
    mention: &str,
    explicit_links: &[EntityLink],
) -> EngineResult<EntityResolution> {
    let mention = mention.trim();
    if mention.is_empty() {
        return Ok(EntityResolution {
            canonical: None,
            entity_id: None,
            confidence: 0.0,
            source: ResolutionSource::Unresolved,
        });
    }

    // 1. Explicit link supplied by the extractor.
    if let Some(link) = explicit_links
        .iter()
        .find(|l| l.mention.eq_ignore_ascii_case(mention))
    {
        let record = match entity_store::find_entity_by_canonical_conn(conn, &link.canonical)? {
            Some(mut existing) => {
                if !existing.aliases.iter().any(|a| a.eq_ignore_ascii_case(mention))
                    && !existing.canonical_name.eq_ignore_ascii_case(mention)
                {
                    existing.aliases.push(mention.to_string());
                }
                existing.last_seen_at = now_ts();
                entity_store::update_entity_conn(conn, &existing)?;
                existing
            }
            None => {
                let record = EntityRecord {
                    canonical_name: link.canonical.clone(),
                    aliases: if link.canonical.eq_ignore_ascii_case(mention) {
                        vec![]
                    } else {
                        vec![mention.to_string()]
                    },
                    entity_type: infer_type(&link.canonical),
                    confidence: 0.95,
                    ..Default::default()
                };
                entity_store::insert_entity_conn(conn, &record)?;
                record
            }
        };
        return Ok(EntityResolution {
            canonical: Some(record.canonical_name),
            entity_id: Some(record.id),
            confidence: 0.95,
            source: ResolutionSource::ExplicitLink,
        });
    }

    // 2. Case-folded canonical match.
    if let Some(record) = entity_store::find_entity_by_canonical_conn(conn, mention)? {
        return Ok(EntityResolution {
            canonical: Some(record.canonical_name),
            entity_id: Some(record.id),
            confidence: 1.0,
            source: ResolutionSource::ExactMatch,
        });
    }

    // 3. Case-folded alias match.
    if let Some(record) = entity_store::find_entity_by_alias_conn(conn, mention)? {
        return Ok(EntityResolution {
            canonical: Some(record.canonical_name),
            entity_id: Some(record.id),
            confidence: 0.9,
            source: ResolutionSource::AliasMatch,
        });
    }

    // 4. New entity for capitalized mentions.
    if starts_uppercase(mention) {
        let record = EntityRecord {
            canonical_name: mention.to_string(),
            entity_type: infer_type(mention),
            confidence: 0.7,
            ..Default::default()
        };
        entity_store::insert_entity_conn(conn, &record)?;
        info!(
            "[memory:entity] New entity: {} ({})",
            record.canonical_name,
            record.entity_type.as_str()
        );
        return Ok(EntityResolution {
            canonical: Some(record.canonical_name),
            entity_id: Some(record.id),
            confidence: 0.7,
            source: ResolutionSource::NewEntity,
        });
    }

    // 5. Lowercase unknowns stay unresolved.
    Ok(EntityResolution {
        canonical: None,
        entity_id: None,
        confidence: 0.0,
        source: ResolutionSource::Unresolved,
    })
}

/// Resolve every mention in a proposal and union the new memory id into each
/// resolved entity's memory_ids. Returns how many entities were linked.
pub fn link_proposal_entities(
    conn: &Connection,
    proposal: &MemoryProposal,
    memory_id: &str,
) -> EngineResult<usize> {
    let mut linked = 0usize;
    for mention in &proposal.entities {
        let resolution = resolve(conn, mention, &proposal.entity_links)?;
        if let Some(entity_id) = resolution.entity_id {
            if let Some(mut record) = entity_store::get_entity_conn(conn, &entity_id)? {
                if !record.memory_ids.iter().any(|m| m == memory_id) {
                    record.memory_ids.push(memory_id.to_string());
                }
                record.last_seen_at = now_ts();
                entity_store::update_entity_conn(conn, &record)?;
                linked += 1;
            }
        }
    }
    Ok(linked)
}

// ═══════════════════════════════════════════════════════════════════════════
// Merge
// ═══════════════════════════════════════════════════════════════════════════

/// Absorb `secondary` into `primary`: union aliases (the secondary canonical
/// becomes an alias), union memory_ids, delete the secondary row. Atomic
/// within the caller's transaction. The resulting alias/memory_id sets are
/// the same whichever side is primary.
pub fn merge(conn: &Connection, primary_id: &str, secondary_id: &str) -> EngineResult<EntityRecord> {
    let mut primary = entity_store::get_entity_conn(conn, primary_id)?
        .ok_or_else(|| EngineError::Input(format!("entity not found: {primary_id}")))?;
    let secondary = entity_store::get_entity_conn(conn, secondary_id)?
        .ok_or_else(|| EngineError::Input(format!("entity not found: {secondary_id}")))?;

    if !primary
        .aliases
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&secondary.canonical_name))
        && !primary
            .canonical_name
            .eq_ignore_ascii_case(&secondary.canonical_name)
    {
        primary.aliases.push(secondary.canonical_name.clone());
    }
    for alias in &secondary.aliases {
        if !primary.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
            && !primary.canonical_name.eq_ignore_ascii_case(alias)
        {
            primary.aliases.push(alias.clone());
        }
    }
    for mid in &secondary.memory_ids {
        if !primary.memory_ids.contains(mid) {
            primary.memory_ids.push(mid.clone());
        }
    }
    if secondary.last_seen_at > primary.last_seen_at {
        primary.last_seen_at = secondary.last_seen_at.clone();
    }
    primary.confidence = primary.confidence.max(secondary.confidence);
    primary.confirmed = primary.confirmed || secondary.confirmed;

    entity_store::update_entity_conn(conn, &primary)?;
    entity_store::delete_entity_conn(conn, secondary_id)?;

    info!(
        "[memory:entity] Merged '{}' into '{}'",
        secondary.canonical_name, primary.canonical_name
    );
    Ok(primary)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::MemoryStore;
    use std::collections::BTreeSet;

    #[test]
    fn type_inference_patterns() {
        assert_eq!(infer_type("Dr. Papadopoulos"), EntityType::Person);
        assert_eq!(infer_type("Elm Street"), EntityType::Place);
        assert_eq!(infer_type("Acme Corp"), EntityType::Organization);
        assert_eq!(infer_type("Banjo"), EntityType::Unknown);
    }

    #[test]
    fn resolve_creates_then_matches_exactly() {
        let store = MemoryStore::open_in_memory().unwrap();
        let conn = store.conn.lock();

        let first = resolve(&conn, "Athens City", &[]).unwrap();
        assert_eq!(first.source, ResolutionSource::NewEntity);
        assert!((first.confidence - 0.7).abs() < 1e-6);

        let second = resolve(&conn, "athens city", &[]).unwrap();
        assert_eq!(second.source, ResolutionSource::ExactMatch);
        assert_eq!(second.entity_id, first.entity_id);
        assert!((second.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resolve_prefers_explicit_link() {
        let store = MemoryStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let links = vec![EntityLink {
            mention: "Alex".into(),
            canonical: "Alexandra Chen".into(),
            relationship: None,
        }];
        let res = resolve(&conn, "Alex", &links).unwrap();
        assert_eq!(res.source, ResolutionSource::ExplicitLink);
        assert_eq!(res.canonical.as_deref(), Some("Alexandra Chen"));
        assert!((res.confidence - 0.95).abs() < 1e-6);

        // The mention is now an alias of the canonical record.
        let again = resolve(&conn, "Alex", &[]).unwrap();
        assert_eq!(again.source, ResolutionSource::AliasMatch);
        assert!((again.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn lowercase_mention_is_unresolved() {
        let store = MemoryStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let res = resolve(&conn, "coffee", &[]).unwrap();
        assert_eq!(res.source, ResolutionSource::Unresolved);
        assert!(res.entity_id.is_none());
        assert_eq!(res.confidence, 0.0);
    }

    fn seed_pair(conn: &rusqlite::Connection) -> (String, String) {
        let a = EntityRecord {
            canonical_name: "Costa".into(),
            aliases: vec!["Kostas".into()],
            memory_ids: vec!["m1".into(), "m2".into()],
            ..Default::default()
        };
        let b = EntityRecord {
            canonical_name: "Konstantinos".into(),
            aliases: vec!["Costas".into()],
            memory_ids: vec!["m2".into(), "m3".into()],
            ..Default::default()
        };
        entity_store::insert_entity_conn(conn, &a).unwrap();
        entity_store::insert_entity_conn(conn, &b).unwrap();
        (a.id, b.id)
    }

    #[test]
    fn merge_is_commutative_on_content() {
        let store_ab = MemoryStore::open_in_memory().unwrap();
        let store_ba = MemoryStore::open_in_memory().unwrap();

        let merged_ab = {
            let conn = store_ab.conn.lock();
            let (a, b) = seed_pair(&conn);
            merge(&conn, &a, &b).unwrap()
        };
        let merged_ba = {
            let conn = store_ba.conn.lock();
            let (a, b) = seed_pair(&conn);
            merge(&conn, &b, &a).unwrap()
        };

        // Canonicals may differ, but the union of names and memory_ids is
        // identical whichever direction the merge ran.
        let names = |rec: &EntityRecord| -> BTreeSet<String> {
            rec.aliases
                .iter()
                .chain(std::iter::once(&rec.canonical_name))
                .map(|s| s.to_lowercase())
                .collect()
        };
        assert_eq!(names(&merged_ab), names(&merged_ba));

        let ids = |rec: &EntityRecord| -> BTreeSet<String> {
            rec.memory_ids.iter().cloned().collect()
        };
        assert_eq!(ids(&merged_ab), ids(&merged_ba));
    }
}
