// ── Recall Engine: Instant Extractor ───────────────────────────────────────
//
// Regex fast path over the raw user text — no LLM call. Two ordered
// families: self-introductions (names) and likes/dislikes (preferences).
// Matches become memory proposals written through the store before the
// response stream starts, so the NEXT turn retrieves them.
//
// All patterns live in this module; the deep extractor handles everything
// these tables miss.

use crate::atoms::types::{
    BeliefTier, MemoryProposal, PreferenceProposal, StructuredFact, Temporal, Valence,
};
use regex::Regex;
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════
// Name patterns
// ═══════════════════════════════════════════════════════════════════════════

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:(?i)my name is) ([A-Z][a-z]+)",
        r"(?:(?i)i am) ([A-Z][a-z]+)",
        r"(?:(?i)i'm) ([A-Z][a-z]+)",
        r"(?:(?i)call me) ([A-Z][a-z]+)",
        r"(?:(?i)this is) ([A-Z][a-z]+) (?:(?i)speaking|here)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("name pattern"))
    .collect()
});

/// Capitalized words that are sentence fillers, not names.
const NAME_REJECTS: &[&str] = &["here", "there", "fine", "good", "great", "okay"];

// ═══════════════════════════════════════════════════════════════════════════
// Preference patterns (ordered; strength reflects wording intensity)
// ═══════════════════════════════════════════════════════════════════════════

struct PreferencePattern {
    pattern: &'static LazyLock<Regex>,
    valence: Valence,
    strength: f32,
}

static LOVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi (?:really )?(?:love|adore) (.+)").expect("love"));
static LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi (?:like|enjoy|prefer) (.+)").expect("like"));
static HATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bi (?:really )?(?:hate|despise|can't stand) (.+)").expect("hate")
});
static DISLIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi (?:don't like|dislike) (.+)").expect("dislike"));
static FAVORITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmy favorite(?: [a-z]+)? (?:is|are) (.+)").expect("favorite")
});

static PREFERENCE_PATTERNS: &[PreferencePattern] = &[
    PreferencePattern { pattern: &LOVE, valence: Valence::Positive, strength: 0.9 },
    PreferencePattern { pattern: &LIKE, valence: Valence::Positive, strength: 0.7 },
    PreferencePattern { pattern: &HATE, valence: Valence::Negative, strength: 0.9 },
    PreferencePattern { pattern: &DISLIKE, valence: Valence::Negative, strength: 0.7 },
    PreferencePattern { pattern: &FAVORITE, valence: Valence::Positive, strength: 0.85 },
];

/// A secondary dislike clause after a positive match ("…and hate country").
static TRAILING_NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:hate|despise|can't stand|don't like|dislike) (.+)")
        .expect("trailing negative")
});

/// Trim a captured object down to its first clause.
fn first_clause(raw: &str) -> String {
    let mut s = raw;
    let folded = s.to_lowercase();
    if let Some(pos) = folded.find(" and ") {
        s = &s[..pos];
    }
    s.trim()
        .trim_end_matches(['.', ',', '!', '?', ';'])
        .trim()
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════════════════════

/// Extract fast-path memory proposals from one user utterance.
pub fn extract_instant(text: &str) -> Vec<MemoryProposal> {
    let mut proposals = Vec::new();

    // ── Names ────────────────────────────────────────────────────────────
    for pattern in NAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if name.is_empty() || NAME_REJECTS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                continue;
            }
            proposals.push(MemoryProposal {
                should_write: true,
                summary: format!("User's name is {}.", name),
                tier: BeliefTier::AssertedFact,
                confidence: 0.95,
                entities: vec![name.to_string()],
                facts: vec![format!("The user introduced themselves as {}.", name)],
                structured_facts: vec![StructuredFact {
                    subject: "user".into(),
                    predicate: "name".into(),
                    object: name.to_string(),
                    confidence: 0.95,
                    temporal: Temporal::Current,
                }],
                importance: 8.0,
                ..Default::default()
            });
            break;
        }
    }

    // ── Preferences ──────────────────────────────────────────────────────
    let mut matched_positive: Option<(String, Valence, f32)> = None;
    for entry in PREFERENCE_PATTERNS {
        if let Some(caps) = entry.pattern.captures(text) {
            let object = first_clause(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
            if !object.is_empty() {
                matched_positive = Some((object, entry.valence, entry.strength));
            }
            break;
        }
    }

    if let Some((entity, valence, strength)) = matched_positive {
        proposals.push(preference_proposal(&entity, valence, strength));

        // A dislike clause later in the same utterance produces a second,
        // negative preference ("I love rock music and hate country").
        if valence == Valence::Positive {
            if let Some(caps) = TRAILING_NEGATIVE.captures(text) {
                let object = first_clause(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
                if !object.is_empty() && !object.eq_ignore_ascii_case(&entity) {
                    let strength = if caps
                        .get(0)
                        .map(|m| {
                            let s = m.as_str().to_lowercase();
                            s.starts_with("hate")
                                || s.starts_with("despise")
                                || s.starts_with("can't stand")
                        })
                        .unwrap_or(false)
                    {
                        0.9
                    } else {
                        0.7
                    };
                    proposals.push(preference_proposal(&object, Valence::Negative, strength));
                }
            }
        }
    }

    proposals
}

fn preference_proposal(entity: &str, valence: Valence, strength: f32) -> MemoryProposal {
    let verb = match valence {
        Valence::Positive => "likes",
        Valence::Negative => "dislikes",
        Valence::Neutral => "mentioned",
    };
    MemoryProposal {
        should_write: true,
        summary: format!("User {} {}.", verb, entity),
        tier: BeliefTier::Preference,
        confidence: 0.85,
        entities: vec![entity.to_string()],
        preferences: vec![PreferenceProposal {
            entity: entity.to_string(),
            valence,
            strength,
            context: None,
        }],
        importance: 6.0,
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
