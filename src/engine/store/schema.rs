// ── Recall Store: Database Schema ──────────────────────────────────────────
//
// Tables:
//   - memory_units: beliefs with tier, confidence, importance, embedding
//   - memory_units_fts: FTS5 index over summary + facts (bm25 text rank)
//   - preferences: first-class preference rows with supersession chain
//   - entities: canonical entities with alias and memory-id join sets
//   - relations: directed weighted edges for spreading activation
//   - contradictions: detected conflicts and their resolution lifecycle
//   - decay_log: append-only audit of importance changes
//
// All statements are idempotent (CREATE IF NOT EXISTS). Called from
// MemoryStore::open(); integration tests run the same migrations against an
// in-memory connection.

use crate::atoms::error::EngineResult;
use log::info;
use rusqlite::Connection;

/// Run all migrations. Safe to call on every startup.
pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    info!("[store] Running schema migrations");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = "
    -- ═══════════════════════════════════════════════════════════════
    -- Memory Units
    -- One row per stored belief. Embeddings are unit-norm f32 BLOBs.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS memory_units (
        id TEXT PRIMARY KEY,
        summary TEXT NOT NULL,

        -- JSON array columns (join sets, not object graphs)
        entities TEXT NOT NULL DEFAULT '[]',
        facts TEXT NOT NULL DEFAULT '[]',
        structured_facts TEXT NOT NULL DEFAULT '[]',
        supersedes TEXT NOT NULL DEFAULT '[]',

        -- Belief
        tier TEXT NOT NULL DEFAULT 'observed_fact',
        confidence REAL NOT NULL DEFAULT 0.8,

        -- Temporal validity (NULL valid_to = still valid)
        valid_from TEXT,
        valid_to TEXT,

        -- Importance under decay + reinforcement
        base_importance REAL NOT NULL DEFAULT 5.0,
        current_importance REAL NOT NULL DEFAULT 5.0,
        last_decay_at TEXT NOT NULL,

        -- Access tracking
        access_count INTEGER NOT NULL DEFAULT 0,
        last_accessed_at TEXT,

        -- Embedding (f32 little-endian BLOB, unit norm)
        embedding BLOB,

        -- State
        is_active INTEGER NOT NULL DEFAULT 1,
        source_conversation_id TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_memory_active
        ON memory_units(is_active);
    CREATE INDEX IF NOT EXISTS idx_memory_tier
        ON memory_units(tier);
    CREATE INDEX IF NOT EXISTS idx_memory_importance
        ON memory_units(current_importance DESC);
    CREATE INDEX IF NOT EXISTS idx_memory_created
        ON memory_units(created_at);

    -- FTS5 index for keyword search (bm25 ranking)
    CREATE VIRTUAL TABLE IF NOT EXISTS memory_units_fts USING fts5(
        id UNINDEXED,
        summary,
        facts,
        content=memory_units,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    -- Triggers keep the FTS table in sync with memory_units
    CREATE TRIGGER IF NOT EXISTS memory_fts_insert AFTER INSERT ON memory_units
    BEGIN
        INSERT INTO memory_units_fts(rowid, id, summary, facts)
        VALUES (NEW.rowid, NEW.id, NEW.summary, NEW.facts);
    END;

    CREATE TRIGGER IF NOT EXISTS memory_fts_delete AFTER DELETE ON memory_units
    BEGIN
        INSERT INTO memory_units_fts(memory_units_fts, rowid, id, summary, facts)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.summary, OLD.facts);
    END;

    CREATE TRIGGER IF NOT EXISTS memory_fts_update AFTER UPDATE ON memory_units
    BEGIN
        INSERT INTO memory_units_fts(memory_units_fts, rowid, id, summary, facts)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.summary, OLD.facts);
        INSERT INTO memory_units_fts(rowid, id, summary, facts)
        VALUES (NEW.rowid, NEW.id, NEW.summary, NEW.facts);
    END;

    -- ═══════════════════════════════════════════════════════════════
    -- Preferences
    -- Content-immutable; supersession inserts a new row and flips
    -- is_active on the old one.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS preferences (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL DEFAULT 'user',
        entity TEXT NOT NULL,
        valence TEXT NOT NULL,
        strength REAL NOT NULL DEFAULT 0.7,
        context TEXT,
        confidence REAL NOT NULL DEFAULT 0.8,
        memory_id TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        superseded_by TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_pref_entity
        ON preferences(entity COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_pref_active
        ON preferences(is_active);
    CREATE INDEX IF NOT EXISTS idx_pref_memory
        ON preferences(memory_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Entities
    -- canonical_name unique under case-folding; aliases and memory_ids
    -- are JSON array join sets.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        canonical_name TEXT NOT NULL,
        aliases TEXT NOT NULL DEFAULT '[]',
        entity_type TEXT NOT NULL DEFAULT 'unknown',
        confidence REAL NOT NULL DEFAULT 0.7,
        confirmed INTEGER NOT NULL DEFAULT 0,
        memory_ids TEXT NOT NULL DEFAULT '[]',
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_entity_canonical
        ON entities(canonical_name COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_entity_type
        ON entities(entity_type);

    -- ═══════════════════════════════════════════════════════════════
    -- Relations (Graph Edges)
    -- Unique per (source, target, type); conflicting inserts max-merge
    -- the weight.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS relations (
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        relation_type TEXT NOT NULL DEFAULT 'related_to',
        weight REAL NOT NULL DEFAULT 0.5,
        bidirectional INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        PRIMARY KEY (source_id, target_id, relation_type)
    );

    CREATE INDEX IF NOT EXISTS idx_relations_source
        ON relations(source_id);
    CREATE INDEX IF NOT EXISTS idx_relations_target
        ON relations(target_id);

    -- ═══════════════════════════════════════════════════════════════
    -- Contradictions
    -- memory_a is the newer side. Terminal resolutions stamp resolved_at.
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS contradictions (
        id TEXT PRIMARY KEY,
        memory_a TEXT NOT NULL,
        memory_b TEXT NOT NULL,
        field_path TEXT,
        reason TEXT NOT NULL,
        resolution TEXT NOT NULL DEFAULT 'pending',
        resolution_note TEXT,
        detected_at TEXT NOT NULL,
        resolved_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_contradiction_resolution
        ON contradictions(resolution);

    -- ═══════════════════════════════════════════════════════════════
    -- Decay Log (Append-Only)
    -- ═══════════════════════════════════════════════════════════════
    CREATE TABLE IF NOT EXISTS decay_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        memory_id TEXT NOT NULL,
        old_importance REAL NOT NULL,
        new_importance REAL NOT NULL,
        decay_factor REAL NOT NULL,
        reinforcement REAL NOT NULL,
        run_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_decay_log_memory
        ON decay_log(memory_id);
";
