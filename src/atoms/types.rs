// ── Recall Atoms: Memory Engine Types ──────────────────────────────────────
//
// Type definitions for the memory engine — beliefs, preferences, entities,
// relations, contradictions, and the extractor proposal schema.
// These are pure data types (no DB access, no I/O).
//
// Follows the project pattern: structs in atoms/, impls in engine/.

use serde::{Deserialize, Serialize};

/// Timestamp format used everywhere — ISO 8601, UTC, second precision.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC timestamp in the canonical format.
pub fn now_ts() -> String {
    chrono::Utc::now().format(TS_FORMAT).to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Belief Tiers
// ═══════════════════════════════════════════════════════════════════════════

/// Categorical confidence band on a memory. Every stored belief carries one,
/// and its scalar confidence is clamped to the tier's floor/ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BeliefTier {
    AssertedFact,
    ObservedFact,
    Preference,
    Hypothesis,
    TemporaryContext,
}

impl Default for BeliefTier {
    fn default() -> Self {
        BeliefTier::ObservedFact
    }
}

impl BeliefTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeliefTier::AssertedFact => "asserted_fact",
            BeliefTier::ObservedFact => "observed_fact",
            BeliefTier::Preference => "preference",
            BeliefTier::Hypothesis => "hypothesis",
            BeliefTier::TemporaryContext => "temporary_context",
        }
    }

    pub fn parse(s: &str) -> Option<BeliefTier> {
        match s {
            "asserted_fact" => Some(BeliefTier::AssertedFact),
            "observed_fact" => Some(BeliefTier::ObservedFact),
            "preference" => Some(BeliefTier::Preference),
            "hypothesis" => Some(BeliefTier::Hypothesis),
            "temporary_context" => Some(BeliefTier::TemporaryContext),
            _ => None,
        }
    }
}

/// Temporal validity marker on a structured fact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Temporal {
    Current,
    Past,
    Future,
    Unknown,
}

impl Default for Temporal {
    fn default() -> Self {
        Temporal::Unknown
    }
}

impl Temporal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temporal::Current => "current",
            Temporal::Past => "past",
            Temporal::Future => "future",
            Temporal::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Temporal {
        match s {
            "current" => Temporal::Current,
            "past" => Temporal::Past,
            "future" => Temporal::Future,
            _ => Temporal::Unknown,
        }
    }
}

/// A subject-predicate-object fact with its own confidence and temporality.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructuredFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    #[serde(default)]
    pub temporal: Temporal,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Memory Unit
// ═══════════════════════════════════════════════════════════════════════════

/// The atomic stored belief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: String,
    /// Short natural-language sentence.
    pub summary: String,
    /// Mention strings found in or attached to this memory.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Free-form natural-language facts.
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub structured_facts: Vec<StructuredFact>,
    pub tier: BeliefTier,
    /// Scalar confidence, clamped to the tier bounds on write.
    pub confidence: f32,
    /// Temporal validity window. A null `valid_to` means still valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    /// Importance on a 1–10 scale. `current_importance` decays over time and
    /// is reinforced by access; it never drops below the configured floor.
    pub base_importance: f64,
    pub current_importance: f64,
    pub last_decay_at: String,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<String>,
    /// Unit-normalized embedding (None only for rows awaiting backfill).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// One-way flag: once false, never true again.
    pub is_active: bool,
    /// Ids of older memories this one replaced.
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    pub created_at: String,
}

impl Default for MemoryUnit {
    fn default() -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            summary: String::new(),
            entities: Vec::new(),
            facts: Vec::new(),
            structured_facts: Vec::new(),
            tier: BeliefTier::default(),
            confidence: 0.8,
            valid_from: None,
            valid_to: None,
            base_importance: 5.0,
            current_importance: 5.0,
            last_decay_at: now.clone(),
            access_count: 0,
            last_accessed_at: None,
            embedding: None,
            is_active: true,
            supersedes: Vec::new(),
            source_conversation_id: None,
            created_at: now,
        }
    }
}

/// A memory returned from retrieval, with its hybrid score and the paths
/// that activated it.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMemory {
    pub memory: MemoryUnit,
    pub combined_score: f64,
    /// "direct" for base-score candidates, `spread_<relation_type>` for
    /// memories reached through graph edges. Multi-path hits accumulate.
    pub activation_sources: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Preferences
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
}

impl Valence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Valence::Positive => "positive",
            Valence::Negative => "negative",
            Valence::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Valence> {
        match s {
            "positive" => Some(Valence::Positive),
            "negative" => Some(Valence::Negative),
            "neutral" => Some(Valence::Neutral),
            _ => None,
        }
    }
}

/// First-class preference record. Content-immutable: updates insert a new
/// row and deactivate the prior one via `superseded_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub id: String,
    pub subject: String,
    pub entity: String,
    pub valence: Valence,
    pub strength: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub created_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Entities
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Place,
    Organization,
    Unknown,
}

impl Default for EntityType {
    fn default() -> Self {
        EntityType::Unknown
    }
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Place => "place",
            EntityType::Organization => "organization",
            EntityType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> EntityType {
        match s {
            "person" => EntityType::Person,
            "place" => EntityType::Place,
            "organization" => EntityType::Organization,
            _ => EntityType::Unknown,
        }
    }
}

/// Canonical entity record. Entities and memories cross-reference through
/// `memory_ids`; neither owns the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    /// Unique under case-folding.
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    pub confidence: f32,
    pub confirmed: bool,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    pub first_seen_at: String,
    pub last_seen_at: String,
}

impl Default for EntityRecord {
    fn default() -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            canonical_name: String::new(),
            aliases: Vec::new(),
            entity_type: EntityType::Unknown,
            confidence: 0.7,
            confirmed: false,
            memory_ids: Vec::new(),
            first_seen_at: now.clone(),
            last_seen_at: now,
        }
    }
}

/// Where an entity resolution came from, in lookup order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ExplicitLink,
    ExactMatch,
    AliasMatch,
    NewEntity,
    Unresolved,
}

/// Result of canonicalizing a mention.
#[derive(Debug, Clone, Serialize)]
pub struct EntityResolution {
    pub canonical: Option<String>,
    pub entity_id: Option<String>,
    pub confidence: f32,
    pub source: ResolutionSource,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Relations
// ═══════════════════════════════════════════════════════════════════════════

/// Directed edge between two memories. Unique on (source, target, type);
/// conflicting inserts max-merge the weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub bidirectional: bool,
    pub created_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Contradictions
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    ASupersedes,
    BSupersedes,
    Coexist,
    Merged,
    UserResolved,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Pending => "pending",
            Resolution::ASupersedes => "a_supersedes",
            Resolution::BSupersedes => "b_supersedes",
            Resolution::Coexist => "coexist",
            Resolution::Merged => "merged",
            Resolution::UserResolved => "user_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Resolution> {
        match s {
            "pending" => Some(Resolution::Pending),
            "a_supersedes" => Some(Resolution::ASupersedes),
            "b_supersedes" => Some(Resolution::BSupersedes),
            "coexist" => Some(Resolution::Coexist),
            "merged" => Some(Resolution::Merged),
            "user_resolved" => Some(Resolution::UserResolved),
            _ => None,
        }
    }
}

/// A recorded conflict between two memories. `memory_a` is the newer side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub memory_a: String,
    pub memory_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    pub reason: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    pub detected_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 7: Decay Log
// ═══════════════════════════════════════════════════════════════════════════

/// Append-only audit record for decay sweeps and archival.
#[derive(Debug, Clone, Serialize)]
pub struct DecayLogEntry {
    pub memory_id: String,
    pub old_importance: f64,
    pub new_importance: f64,
    pub decay_factor: f64,
    pub reinforcement: f64,
    pub run_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 8: Memory Proposal (extractor output, post-sanitization)
// ═══════════════════════════════════════════════════════════════════════════

/// Preference as proposed by an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceProposal {
    pub entity: String,
    pub valence: Valence,
    pub strength: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Extractor-supplied mention → canonical mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLink {
    pub mention: String,
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// Extractor-supplied contradiction hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionHint {
    pub memory_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<String>,
}

/// The validated write request for one memory. Instant extraction builds
/// these directly; the deep extractor's JSON is sanitized into one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryProposal {
    pub should_write: bool,
    pub summary: String,
    pub tier: BeliefTier,
    pub confidence: f32,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub structured_facts: Vec<StructuredFact>,
    #[serde(default)]
    pub preferences: Vec<PreferenceProposal>,
    #[serde(default)]
    pub entity_links: Vec<EntityLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub related_to: Vec<String>,
    #[serde(default)]
    pub contradicts: Vec<ContradictionHint>,
    pub importance: f64,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
}

impl Default for MemoryProposal {
    fn default() -> Self {
        Self {
            should_write: false,
            summary: String::new(),
            tier: BeliefTier::default(),
            confidence: 0.8,
            entities: Vec::new(),
            facts: Vec::new(),
            structured_facts: Vec::new(),
            preferences: Vec::new(),
            entity_links: Vec::new(),
            valid_from: None,
            valid_to: None,
            related_to: Vec::new(),
            contradicts: Vec::new(),
            importance: 5.0,
            supersedes: Vec::new(),
            source_conversation_id: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 9: Stats
// ═══════════════════════════════════════════════════════════════════════════

/// Aggregate counts for the /stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub active_memories: usize,
    pub tier_counts: std::collections::HashMap<String, usize>,
    pub average_confidence: f64,
    pub average_importance: f64,
    pub preferences: usize,
    pub entities: usize,
    pub relations: usize,
    pub pending_contradictions: usize,
}
