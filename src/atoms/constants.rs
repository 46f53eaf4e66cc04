// ── Recall Atoms: Tunable Constants ────────────────────────────────────────
//
// Default values for the numeric tunables. The env-driven overrides live in
// engine/config.rs; everything here is the documented default.

/// Embedding dimension of the default sentence-embedding model.
pub const EMBEDDING_DIM: usize = 384;

/// Exponential decay rate λ, per day.
pub const DEFAULT_DECAY_RATE: f64 = 0.05;

/// Reinforcement bonus β per recent access.
pub const DEFAULT_REINFORCEMENT_BONUS: f64 = 0.3;

/// Importance never decays below this floor.
pub const DEFAULT_IMPORTANCE_FLOOR: f64 = 1.0;

/// Hours between decay sweeps.
pub const DEFAULT_DECAY_INTERVAL_HOURS: u64 = 6;

/// Default top-k for retrieval.
pub const DEFAULT_RETRIEVAL_K: usize = 5;

/// Minimum query cosine for a memory to enter the candidate frontier.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Spreading-activation recursion depth.
pub const DEFAULT_SPREADING_DEPTH: usize = 2;

/// Per-hop spreading attenuation (squared at each level).
pub const DEFAULT_SPREADING_DECAY: f64 = 0.5;

/// Cosine threshold for the semantic contradiction pass.
pub const DEFAULT_CONTRADICTION_THRESHOLD: f64 = 0.75;

/// Reinforcement only counts accesses within this window.
pub const REINFORCEMENT_WINDOW_DAYS: f64 = 7.0;

/// Access count is capped at this value inside the reinforcement term.
pub const REINFORCEMENT_ACCESS_CAP: u32 = 10;

/// Decay-log rows are only written when the importance change is material.
pub const DECAY_LOG_EPSILON: f64 = 0.01;

/// Memories below this importance and older than the age cutoff are archived.
pub const ARCHIVE_IMPORTANCE_CUTOFF: f64 = 1.5;
pub const ARCHIVE_AGE_DAYS: f64 = 90.0;

/// Entity-overlap threshold for relation auto-discovery.
pub const RELATION_OVERLAP_THRESHOLD: f64 = 0.3;

/// At most this many candidates are examined during relation discovery.
pub const RELATION_DISCOVERY_LIMIT: usize = 10;

/// Weight assigned to explicit `related_to` links from the extractor.
pub const EXPLICIT_RELATION_WEIGHT: f64 = 0.8;

/// Summary-similarity threshold for flagging a potential update.
pub const POTENTIAL_UPDATE_SIMILARITY: f64 = 0.85;

/// Confidence gap that lets one side of a conflict win outright.
pub const CONFIDENCE_GAP: f32 = 0.2;

/// Candidates examined per contradiction pass.
pub const CONTRADICTION_CANDIDATES: usize = 10;

/// Recent identity-bearing memories examined by the identity guard.
pub const IDENTITY_GUARD_WINDOW: usize = 5;
