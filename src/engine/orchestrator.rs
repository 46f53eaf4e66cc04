// ── Recall Engine: Turn Orchestrator ───────────────────────────────────────
//
// The per-turn pipeline:
//
//   P0 instant  — regex extraction, written synchronously (next turn sees it)
//   P1 retrieve — hybrid retrieval + preference lookup, then reinforcement
//   P2 respond  — stream the response generator, proxying chunks live
//   P3 extract  — after the stream ends, deep extraction in a detached task
//   P4 store    — write the proposal with conversation provenance
//
// P3+P4 are fire-and-forget: they never borrow the inbound request, never
// block the caller, and their failures are logged only. P0 ids are excluded
// from P1 so an instant write is retrievable starting NEXT turn, not this
// one.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{Preference, RetrievedMemory, Valence};
use crate::engine::chat::ChatClient;
use crate::engine::config::EngineConfig;
use crate::engine::embedding::EmbeddingClient;
use crate::engine::store::MemoryStore;
use crate::engine::{extractor, instant, retrieval};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared service state: store, clients, config. Cloned by Arc into every
/// connection handler and background task.
pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub embedder: Arc<EmbeddingClient>,
    pub responder: Arc<ChatClient>,
    pub extractor: Arc<ChatClient>,
    pub config: Arc<EngineConfig>,
}

/// Events forwarded to the SSE writer while a turn runs.
#[derive(Debug)]
pub enum TurnEvent {
    Chunk(String),
    Done,
    Error(String),
}

const RESPONDER_SYSTEM_PROMPT: &str = "\
You are a helpful assistant with long-term memory of this user. Use the \
MEMORY CONTEXT naturally — don't recite it, just let it inform your answers. \
When a memory is low-confidence (hypothesis or temporary context), hedge \
instead of stating it as fact. Never mention the memory system itself.";

/// A turn that has finished P0+P1 and is ready to stream. Split from the
/// streaming phase so the HTTP layer can still answer 500 before any SSE
/// headers go out.
pub struct PreparedTurn {
    pub message: String,
    pub conversation_id: Option<String>,
    pub retrieved: Vec<RetrievedMemory>,
    pub preferences: Vec<Preference>,
}

/// P0 + P1: instant extraction (synchronous writes), then retrieval and
/// preference lookup with this turn's fresh ids excluded. Errors here happen
/// before any response bytes, so the caller can fail the request cleanly.
pub async fn prepare_turn(
    engine: &Engine,
    message: String,
    conversation_id: Option<String>,
) -> EngineResult<PreparedTurn> {
    let mut instant_ids: Vec<String> = Vec::new();
    for proposal in instant::extract_instant(&message) {
        let id = write_proposal(engine, &proposal).await?;
        instant_ids.push(id);
    }
    if !instant_ids.is_empty() {
        info!("[orchestrator] P0 wrote {} instant memories", instant_ids.len());
    }

    let (retrieved, preferences) = retrieve_context(engine, &message, &instant_ids).await?;
    Ok(PreparedTurn { message, conversation_id, retrieved, preferences })
}

/// P2 + P3 + P4: stream the response, then hand off to the detached
/// extract-and-store task. Every failure from here on is an event.
pub async fn stream_turn(
    engine: Arc<Engine>,
    turn: PreparedTurn,
    events: mpsc::UnboundedSender<TurnEvent>,
) {
    let PreparedTurn { message, conversation_id, retrieved, preferences } = turn;

    let context = format_memory_context(&retrieved, &preferences);
    let user_prompt = format!("MEMORY CONTEXT:\n{}\n\nUSER: {}", context, message);

    let chunk_events = events.clone();
    let reply = engine
        .responder
        .stream_chat(RESPONDER_SYSTEM_PROMPT, &user_prompt, |delta| {
            let _ = chunk_events.send(TurnEvent::Chunk(delta.to_string()));
        })
        .await;

    let full_reply = match reply {
        Ok(text) => {
            let _ = events.send(TurnEvent::Done);
            text
        }
        Err(e) => {
            let _ = events.send(TurnEvent::Error(e.to_string()));
            return;
        }
    };

    // Fire-and-forget: the extraction tail is not tied to the caller.
    let background = engine.clone();
    tokio::spawn(async move {
        run_extract_and_store(background, message, full_reply, retrieved, conversation_id).await;
    });
}

/// P1 helper: embed the query, retrieve (excluding this turn's P0 writes),
/// reinforce the results, and load active preferences.
async fn retrieve_context(
    engine: &Engine,
    message: &str,
    exclude: &[String],
) -> EngineResult<(Vec<RetrievedMemory>, Vec<Preference>)> {
    let query_embedding = engine.embedder.embed(message).await?;
    let retrieved = retrieval::retrieve_with_embedding(
        &engine.store,
        &query_embedding,
        message,
        &engine.config.retrieval_params(),
        exclude,
    )?;

    let ids: Vec<String> = retrieved.iter().map(|r| r.memory.id.clone()).collect();
    if let Err(e) = engine.store.reinforce_memories(&ids) {
        warn!("[orchestrator] Reinforcement failed: {}", e);
    }

    let preferences = engine.store.user_preferences(None, None)?;
    Ok((retrieved, preferences))
}

/// The detached tail of a turn. Errors are logged, never surfaced.
async fn run_extract_and_store(
    engine: Arc<Engine>,
    user_text: String,
    assistant_reply: String,
    retrieved: Vec<RetrievedMemory>,
    conversation_id: Option<String>,
) {
    let proposal =
        match extractor::run_memory_agent(&engine.extractor, &user_text, &assistant_reply, &retrieved)
            .await
        {
            Ok(Some(mut p)) => {
                p.source_conversation_id = conversation_id;
                p
            }
            Ok(None) => return,
            Err(e) => {
                warn!("[orchestrator] Deep extraction failed: {}", e);
                return;
            }
        };

    match write_proposal(&engine, &proposal).await {
        Ok(id) => info!("[orchestrator] P4 stored memory {}", &id[..8]),
        Err(e) => warn!("[orchestrator] P4 store failed: {}", e),
    }
}

/// Embed then insert. The embedding happens before the store transaction so
/// an embedder outage aborts the write without touching state.
async fn write_proposal(
    engine: &Engine,
    proposal: &crate::atoms::types::MemoryProposal,
) -> EngineResult<String> {
    let embedding = engine.embedder.embed(&proposal.summary).await?;
    let report = engine.store.insert_memory_unit(
        proposal,
        embedding,
        engine.config.contradiction_threshold,
    )?;
    Ok(report.memory_id)
}

// ═══════════════════════════════════════════════════════════════════════════
// Prompt formatting
// ═══════════════════════════════════════════════════════════════════════════

/// Render retrieved memories and preferences into the MEMORY CONTEXT block:
/// one `[tier][conf] summary` line per memory with optional validity
/// suffixes and a facts line, then Likes/Dislikes summaries.
pub fn format_memory_context(
    retrieved: &[RetrievedMemory],
    preferences: &[Preference],
) -> String {
    let mut lines: Vec<String> = Vec::new();

    for item in retrieved {
        let mem = &item.memory;
        let mut line = format!("[{}][{:.1}] {}", mem.tier.as_str(), mem.confidence, mem.summary);
        match (&mem.valid_from, &mem.valid_to) {
            (Some(from), Some(to)) => line.push_str(&format!(" (was true {} to {})", from, to)),
            (Some(from), None) => line.push_str(&format!(" (since {})", from)),
            _ => {}
        }
        lines.push(line);
        if !mem.facts.is_empty() {
            lines.push(format!("  Facts: {}", mem.facts.join("; ")));
        }
    }

    let likes: Vec<&str> = preferences
        .iter()
        .filter(|p| p.valence == Valence::Positive)
        .map(|p| p.entity.as_str())
        .collect();
    let dislikes: Vec<&str> = preferences
        .iter()
        .filter(|p| p.valence == Valence::Negative)
        .map(|p| p.entity.as_str())
        .collect();
    if !likes.is_empty() {
        lines.push(format!("Likes: {}", likes.join(", ")));
    }
    if !dislikes.is_empty() {
        lines.push(format!("Dislikes: {}", dislikes.join(", ")));
    }

    if lines.is_empty() {
        "(no stored memories yet)".to_string()
    } else {
        lines.join("\n")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{BeliefTier, MemoryUnit};

    fn retrieved(summary: &str, tier: BeliefTier, confidence: f32) -> RetrievedMemory {
        RetrievedMemory {
            memory: MemoryUnit {
                summary: summary.into(),
                tier,
                confidence,
                ..Default::default()
            },
            combined_score: 0.5,
            activation_sources: vec!["direct".into()],
        }
    }

    fn preference(entity: &str, valence: Valence) -> Preference {
        Preference {
            id: "p".into(),
            subject: "user".into(),
            entity: entity.into(),
            valence,
            strength: 0.8,
            context: None,
            confidence: 0.85,
            memory_id: None,
            is_active: true,
            superseded_by: None,
            created_at: crate::atoms::types::now_ts(),
        }
    }

    #[test]
    fn context_lines_carry_tier_and_confidence() {
        let mems = vec![retrieved("User's name is Costa.", BeliefTier::AssertedFact, 0.95)];
        let out = format_memory_context(&mems, &[]);
        assert!(out.contains("[asserted_fact][0.9] User's name is Costa."), "got: {out}");
    }

    #[test]
    fn validity_suffixes() {
        let mut item = retrieved("User lives in Berlin.", BeliefTier::ObservedFact, 0.8);
        item.memory.valid_from = Some("2025-01-01".into());
        let out = format_memory_context(&[item.clone()], &[]);
        assert!(out.contains("(since 2025-01-01)"));

        item.memory.valid_to = Some("2025-06-01".into());
        let out = format_memory_context(&[item], &[]);
        assert!(out.contains("(was true 2025-01-01 to 2025-06-01)"));
    }

    #[test]
    fn facts_line_rendering() {
        let mut item = retrieved("User works remotely.", BeliefTier::ObservedFact, 0.8);
        item.memory.facts = vec!["works from home".into(), "keeps odd hours".into()];
        let out = format_memory_context(&[item], &[]);
        assert!(out.contains("  Facts: works from home; keeps odd hours"));
    }

    #[test]
    fn preference_summary_lines() {
        let prefs = vec![
            preference("rock music", Valence::Positive),
            preference("jazz", Valence::Positive),
            preference("country", Valence::Negative),
        ];
        let out = format_memory_context(&[], &prefs);
        assert!(out.contains("Likes: rock music, jazz"));
        assert!(out.contains("Dislikes: country"));
    }

    #[test]
    fn empty_context_placeholder() {
        assert_eq!(format_memory_context(&[], &[]), "(no stored memories yet)");
    }
}
