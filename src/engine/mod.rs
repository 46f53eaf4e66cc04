// ── Recall Engine ──────────────────────────────────────────────────────────
//
// Business logic and external-service clients for the memory engine.
//
// Module layout:
//   config        — env-driven EngineConfig
//   embedding     — EmbeddingClient (Ollama + OpenAI-compatible, unit norm)
//   chat          — ChatClient (streaming responder + JSON-mode extractor)
//   tiering       — belief tiers: bounds, classify, enforce, promote/demote
//   entities      — mention canonicalization, type inference, merge
//   decay         — importance decay/reinforcement, sweep loop, audit log
//   retrieval     — hybrid scoring + spreading activation + auto-discovery
//   contradiction — identity guard, semantic pass, resolution strategies
//   instant       — regex fast-path extraction (names, preferences)
//   extractor     — deep-extract adapter with JSON sanitization
//   orchestrator  — the P0→P4 turn pipeline
//   store         — rusqlite persistence (schema, CRUD, write pipeline)
//   server        — hand-rolled HTTP/1.1 + SSE surface

pub mod chat;
pub mod config;
pub mod contradiction;
pub mod decay;
pub mod embedding;
pub mod entities;
pub mod extractor;
pub mod instant;
pub mod orchestrator;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod tiering;
