// ── Recall Engine: Deep-Extract Adapter ────────────────────────────────────
//
// Calls the external extractor model with the user text, the assistant's
// reply, and the retrieved memories, and turns its JSON into a validated
// MemoryProposal. The payload is untrusted: every field gets a default, a
// coercion, or a clamp before anything reaches storage. A parse failure
// triggers exactly one retry with a stricter reminder; a second failure is
// a non-fatal extraction error and the turn writes nothing.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    BeliefTier, ContradictionHint, EntityLink, MemoryProposal, PreferenceProposal, RetrievedMemory,
    StructuredFact, Temporal, Valence,
};
use crate::engine::chat::ChatClient;
use log::{info, warn};
use serde_json::Value;

/// Extractor calls run cold: determinism matters more than prose quality.
const EXTRACTOR_TEMPERATURE: f64 = 0.1;

const EXTRACTOR_SYSTEM_PROMPT: &str = "\
You extract long-term memories from one conversation turn. Reply with a \
single JSON object and nothing else, using this schema:

{
  \"should_write\": bool,
  \"summary\": string (one short sentence),
  \"tier\": \"asserted_fact\" | \"observed_fact\" | \"preference\" | \"hypothesis\" | \"temporary_context\",
  \"confidence\": number 0..1,
  \"entities\": [string],
  \"facts\": [string],
  \"structured_facts\": [{\"subject\": string, \"predicate\": string, \"object\": string, \"confidence\": number, \"temporal\": \"current\"|\"past\"|\"future\"|\"unknown\"}],
  \"preferences\": [{\"entity\": string, \"valence\": \"positive\"|\"negative\"|\"neutral\", \"strength\": number 0..1, \"context\": string?}],
  \"entity_links\": [{\"mention\": string, \"canonical\": string, \"relationship\": string?}],
  \"valid_from\": ISO date string?,
  \"valid_to\": ISO date string?,
  \"related_to\": [memory-id],
  \"contradicts\": [{\"memory_id\": string, \"reason\": string, \"suggested_resolution\": string?}],
  \"importance\": number 1..10,
  \"supersedes\": [memory-id]
}

Set should_write to false when the turn contains nothing worth remembering. \
Only record information about the user, never about yourself.";

/// Run the extractor over one completed turn. Returns None when the model
/// decides there is nothing to store.
pub async fn run_memory_agent(
    extractor: &ChatClient,
    user_text: &str,
    assistant_reply: &str,
    retrieved: &[RetrievedMemory],
) -> EngineResult<Option<MemoryProposal>> {
    let context: String = retrieved
        .iter()
        .map(|r| format!("- [{}] {}", r.memory.id, r.memory.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        "EXISTING MEMORIES:\n{}\n\nUSER SAID:\n{}\n\nASSISTANT REPLIED:\n{}",
        if context.is_empty() { "(none)" } else { &context },
        user_text,
        assistant_reply,
    );

    // First attempt, then one retry with a stricter reminder.
    let value = match extract_once(extractor, &user_prompt).await {
        Ok(v) => v,
        Err(first_err) => {
            warn!("[extract] First attempt failed ({}), retrying", first_err);
            let retry_prompt = format!(
                "{}\n\nReturn ONLY a valid JSON object matching the schema. No prose, no markdown.",
                user_prompt
            );
            extract_once(extractor, &retry_prompt).await.map_err(|e| {
                EngineError::ExtractorParse(format!("retry also failed: {e}"))
            })?
        }
    };

    let proposal = sanitize_proposal(value);
    if !proposal.should_write {
        info!("[extract] Extractor declined to write for this turn");
        return Ok(None);
    }
    Ok(Some(proposal))
}

async fn extract_once(extractor: &ChatClient, user_prompt: &str) -> EngineResult<Value> {
    extractor
        .complete_json(EXTRACTOR_SYSTEM_PROMPT, user_prompt, EXTRACTOR_TEMPERATURE)
        .await
}

// ═══════════════════════════════════════════════════════════════════════════
// Sanitization — untrusted JSON → validated proposal
// ═══════════════════════════════════════════════════════════════════════════

/// Coerce a list item that should be a string. Objects contribute their
/// `.fact` / `.text` / `.content` field, or their JSON encoding as a last
/// resort; everything else is dropped.
fn coerce_string_item(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(map) => {
            for key in ["fact", "text", "content"] {
                if let Some(Value::String(s)) = map.get(key) {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
            serde_json::to_string(item).ok()
        }
        _ => None,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|arr| arr.iter().filter_map(coerce_string_item).collect())
        .unwrap_or_default()
}

fn clamp01(v: f64) -> f32 {
    v.clamp(0.0, 1.0) as f32
}

/// Apply defaults, coercions, and clamps to the raw extractor object.
/// Never panics on any input shape.
pub fn sanitize_proposal(value: Value) -> MemoryProposal {
    let summary = value["summary"]
        .as_str()
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    // should_write defaults to "there is a summary worth keeping".
    let should_write = value["should_write"]
        .as_bool()
        .unwrap_or(!summary.is_empty());

    let tier = value["tier"]
        .as_str()
        .and_then(BeliefTier::parse)
        .unwrap_or_default();

    let confidence = value["confidence"].as_f64().map(clamp01).unwrap_or(0.8);
    let importance = value["importance"].as_f64().unwrap_or(5.0).clamp(1.0, 10.0);

    let structured_facts: Vec<StructuredFact> = value["structured_facts"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let subject = item["subject"].as_str()?.trim().to_string();
                    let predicate = item["predicate"].as_str()?.trim().to_string();
                    let object = item["object"].as_str()?.trim().to_string();
                    if subject.is_empty() || predicate.is_empty() || object.is_empty() {
                        return None;
                    }
                    Some(StructuredFact {
                        subject,
                        predicate,
                        object,
                        confidence: item["confidence"].as_f64().map(clamp01).unwrap_or(0.8),
                        temporal: item["temporal"]
                            .as_str()
                            .map(Temporal::parse)
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    // Malformed preferences are dropped, not guessed at.
    let preferences: Vec<PreferenceProposal> = value["preferences"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let entity = item["entity"].as_str()?.trim().to_string();
                    if entity.is_empty() {
                        return None;
                    }
                    let valence = Valence::parse(item["valence"].as_str()?)?;
                    Some(PreferenceProposal {
                        entity,
                        valence,
                        strength: item["strength"].as_f64().map(clamp01).unwrap_or(0.7),
                        context: item["context"].as_str().map(|s| s.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let entity_links: Vec<EntityLink> = value["entity_links"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let mention = item["mention"].as_str()?.trim().to_string();
                    let canonical = item["canonical"].as_str()?.trim().to_string();
                    if mention.is_empty() || canonical.is_empty() {
                        return None;
                    }
                    Some(EntityLink {
                        mention,
                        canonical,
                        relationship: item["relationship"].as_str().map(|s| s.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let contradicts: Vec<ContradictionHint> = value["contradicts"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let memory_id = item["memory_id"].as_str()?.trim().to_string();
                    if memory_id.is_empty() {
                        return None;
                    }
                    Some(ContradictionHint {
                        memory_id,
                        reason: item["reason"].as_str().unwrap_or("flagged by extractor").to_string(),
                        suggested_resolution: item["suggested_resolution"]
                            .as_str()
                            .map(|s| s.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    MemoryProposal {
        should_write: should_write && !summary.is_empty(),
        summary,
        tier,
        confidence,
        entities: string_list(&value, "entities"),
        facts: string_list(&value, "facts"),
        structured_facts,
        preferences,
        entity_links,
        valid_from: value["valid_from"].as_str().map(|s| s.to_string()),
        valid_to: value["valid_to"].as_str().map(|s| s.to_string()),
        related_to: string_list(&value, "related_to"),
        contradicts,
        importance,
        supersedes: string_list(&value, "supersedes"),
        source_conversation_id: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_applied_for_missing_fields() {
        let p = sanitize_proposal(json!({"summary": "User works in Berlin."}));
        assert!(p.should_write, "non-empty summary implies should_write");
        assert_eq!(p.tier, BeliefTier::ObservedFact);
        assert!((p.confidence - 0.8).abs() < 1e-6);
        assert!((p.importance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_never_writes() {
        let p = sanitize_proposal(json!({"should_write": true, "summary": "   "}));
        assert!(!p.should_write);
    }

    #[test]
    fn numeric_ranges_are_clamped() {
        let p = sanitize_proposal(json!({
            "summary": "x",
            "confidence": 7.5,
            "importance": 42,
        }));
        assert!((p.confidence - 1.0).abs() < 1e-6);
        assert!((p.importance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fact_objects_are_coerced() {
        let p = sanitize_proposal(json!({
            "summary": "x",
            "facts": [
                "plain string",
                {"fact": "from object"},
                {"text": "alt key"},
                {"weird": true},
                42,
            ],
        }));
        assert_eq!(p.facts.len(), 4);
        assert_eq!(p.facts[0], "plain string");
        assert_eq!(p.facts[1], "from object");
        assert_eq!(p.facts[2], "alt key");
        assert!(p.facts[3].contains("weird"));
    }

    #[test]
    fn malformed_preferences_dropped() {
        let p = sanitize_proposal(json!({
            "summary": "x",
            "preferences": [
                {"entity": "jazz", "valence": "positive", "strength": 0.8},
                {"entity": "", "valence": "positive"},
                {"valence": "negative"},
                {"entity": "noise", "valence": "sideways"},
            ],
        }));
        assert_eq!(p.preferences.len(), 1);
        assert_eq!(p.preferences[0].entity, "jazz");
    }

    #[test]
    fn structured_fact_temporal_parsing() {
        let p = sanitize_proposal(json!({
            "summary": "x",
            "structured_facts": [
                {"subject": "user", "predicate": "lives_in", "object": "Berlin",
                 "confidence": 0.9, "temporal": "current"},
                {"subject": "user", "predicate": "lived_in", "object": "Athens",
                 "temporal": "banana"},
                {"subject": "", "predicate": "p", "object": "o"},
            ],
        }));
        assert_eq!(p.structured_facts.len(), 2);
        assert_eq!(p.structured_facts[0].temporal, Temporal::Current);
        assert_eq!(p.structured_facts[1].temporal, Temporal::Unknown);
    }

    #[test]
    fn explicit_should_write_false_wins() {
        let p = sanitize_proposal(json!({"should_write": false, "summary": "anything"}));
        assert!(!p.should_write);
    }

    #[test]
    fn garbage_input_yields_inert_proposal() {
        let p = sanitize_proposal(json!("not even an object"));
        assert!(!p.should_write);
        assert!(p.summary.is_empty());
    }
}
