// ── Recall: persistent structured-memory engine ────────────────────────────
//
// A memory service for conversational assistants with explicit belief
// management: every memory carries a confidence tier, ages under
// exponential decay with access reinforcement, and is checked against
// prior memories for contradiction before it is stored.
//
// Crate layout:
//   atoms/   — pure data types, error enum, tunable defaults
//   engine/  — tiering, entities, decay, retrieval, contradiction,
//              extraction, orchestration, persistence, HTTP surface

pub mod atoms;
pub mod engine;

// Re-exports for the common surface.
pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{
    BeliefTier, Contradiction, EntityRecord, MemoryProposal, MemoryStats, MemoryUnit, Preference,
    Relation, Resolution, RetrievedMemory, Valence,
};
pub use engine::config::EngineConfig;
pub use engine::orchestrator::Engine;
pub use engine::store::MemoryStore;
