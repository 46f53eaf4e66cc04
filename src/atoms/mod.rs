// ── Recall Atoms ───────────────────────────────────────────────────────────
// Pure data types, the canonical error enum, and tunable defaults.
// No I/O, no logic — impls live in engine/.

pub mod constants;
pub mod error;
pub mod types;
