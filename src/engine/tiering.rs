// ── Recall Engine: Belief Tiering ──────────────────────────────────────────
//
// Classify utterances into belief tiers and keep confidences inside the
// tier bounds. Classification uses ordered pattern families — hedging,
// temporal, preference, assertion — first match wins, default observed_fact.
// Fast, deterministic, no ML model required.
//
// The pattern tables are centralized here; nothing else in the engine
// matches tier phrases directly.

use crate::atoms::types::BeliefTier;
use regex::Regex;
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════
// Tier bounds and priority
// ═══════════════════════════════════════════════════════════════════════════

/// (floor, ceiling) confidence bounds per tier.
pub fn bounds(tier: BeliefTier) -> (f32, f32) {
    match tier {
        BeliefTier::AssertedFact => (0.90, 1.00),
        BeliefTier::ObservedFact => (0.80, 1.00),
        BeliefTier::Preference => (0.75, 1.00),
        BeliefTier::Hypothesis => (0.30, 0.50),
        BeliefTier::TemporaryContext => (0.40, 1.00),
    }
}

/// Authority ranking used by contradiction resolution. Higher wins.
pub fn priority(tier: BeliefTier) -> u8 {
    match tier {
        BeliefTier::AssertedFact => 5,
        BeliefTier::ObservedFact => 4,
        BeliefTier::Preference => 3,
        BeliefTier::Hypothesis => 2,
        BeliefTier::TemporaryContext => 1,
    }
}

/// Clamp a confidence into the tier's bounds. Idempotent.
pub fn enforce(tier: BeliefTier, confidence: f32) -> f32 {
    let (floor, ceiling) = bounds(tier);
    confidence.clamp(floor, ceiling)
}

/// The tier one promotion step up, if the tier is promotable.
pub fn promoted(tier: BeliefTier) -> Option<BeliefTier> {
    match tier {
        BeliefTier::AssertedFact => None,
        BeliefTier::ObservedFact => Some(BeliefTier::AssertedFact),
        BeliefTier::Preference => Some(BeliefTier::AssertedFact),
        BeliefTier::Hypothesis => Some(BeliefTier::ObservedFact),
        BeliefTier::TemporaryContext => Some(BeliefTier::ObservedFact),
    }
}

/// The tier one demotion step down, if the tier is demotable.
pub fn demoted(tier: BeliefTier) -> Option<BeliefTier> {
    match tier {
        BeliefTier::AssertedFact => Some(BeliefTier::ObservedFact),
        BeliefTier::ObservedFact => Some(BeliefTier::Hypothesis),
        BeliefTier::Preference => Some(BeliefTier::Hypothesis),
        BeliefTier::Hypothesis => None,
        BeliefTier::TemporaryContext => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Classification pattern families (ordered, first match wins)
// ═══════════════════════════════════════════════════════════════════════════

struct PatternFamily {
    pattern: &'static LazyLock<Regex>,
    tier: BeliefTier,
    confidence: f32,
}

static HEDGING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:i think|maybe|probably|might|not sure|i guess|perhaps|seems like)\b",
    )
    .expect("hedging pattern")
});

static TEMPORAL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:right now|currently|at the moment|today|this week|temporarily)\b")
        .expect("temporal pattern")
});

static PREFERENCE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bi (?:really )?(?:like|love|enjoy|prefer)\b|\bi (?:hate|dislike|don't like|can't stand)\b|\bmy favorite\b|\bi'?m (?:not )?a fan of\b",
    )
    .expect("preference pattern")
});

static ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bi am\b|\bmy name is\b|\bi have\b|\bi work (?:at|for|as)\b|\bi live in\b|\bi'?m from\b|\bi was born\b",
    )
    .expect("assertion pattern")
});

static FAMILIES: &[PatternFamily] = &[
    PatternFamily { pattern: &HEDGING, tier: BeliefTier::Hypothesis, confidence: 0.45 },
    PatternFamily { pattern: &TEMPORAL_MARKER, tier: BeliefTier::TemporaryContext, confidence: 0.40 },
    PatternFamily { pattern: &PREFERENCE_MARKER, tier: BeliefTier::Preference, confidence: 0.80 },
    PatternFamily { pattern: &ASSERTION, tier: BeliefTier::AssertedFact, confidence: 0.92 },
];

/// Classify an utterance into (tier, confidence). Deterministic: identical
/// input always yields the same result.
pub fn classify(text: &str) -> (BeliefTier, f32) {
    for family in FAMILIES {
        if family.pattern.is_match(text) {
            return (family.tier, family.confidence);
        }
    }
    (BeliefTier::ObservedFact, 0.80)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hedged_utterance_is_hypothesis() {
        let (tier, conf) = classify("I think I'm from Greece");
        assert_eq!(tier, BeliefTier::Hypothesis);
        assert!(conf <= 0.50, "hypothesis confidence must respect ceiling, got {conf}");
    }

    #[test]
    fn hedging_beats_assertion() {
        // "I am" is present but "maybe" is in an earlier family.
        let (tier, _) = classify("Maybe I am wrong about that");
        assert_eq!(tier, BeliefTier::Hypothesis);
    }

    #[test]
    fn temporal_marker_wins_over_preference() {
        let (tier, conf) = classify("Right now I like working from home");
        assert_eq!(tier, BeliefTier::TemporaryContext);
        assert!((conf - 0.40).abs() < 1e-6);
    }

    #[test]
    fn preference_marker() {
        let (tier, conf) = classify("I really love hiking");
        assert_eq!(tier, BeliefTier::Preference);
        assert!((conf - 0.80).abs() < 1e-6);
    }

    #[test]
    fn assertion_marker() {
        let (tier, conf) = classify("My name is Costa and I work at a bakery");
        assert_eq!(tier, BeliefTier::AssertedFact);
        assert!((conf - 0.92).abs() < 1e-6);
    }

    #[test]
    fn default_is_observed_fact() {
        let (tier, conf) = classify("The meeting got moved to Thursday");
        assert_eq!(tier, BeliefTier::ObservedFact);
        assert!((conf - 0.80).abs() < 1e-6);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify("I think the server is down");
        let b = classify("I think the server is down");
        assert_eq!(a, b);
    }

    #[test]
    fn enforce_clamps_to_bounds() {
        assert!((enforce(BeliefTier::AssertedFact, 0.5) - 0.90).abs() < 1e-6);
        assert!((enforce(BeliefTier::Hypothesis, 0.9) - 0.50).abs() < 1e-6);
        assert!((enforce(BeliefTier::Preference, 0.8) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn enforce_is_idempotent() {
        for tier in [
            BeliefTier::AssertedFact,
            BeliefTier::ObservedFact,
            BeliefTier::Preference,
            BeliefTier::Hypothesis,
            BeliefTier::TemporaryContext,
        ] {
            for raw in [0.0f32, 0.2, 0.45, 0.6, 0.85, 1.0] {
                let once = enforce(tier, raw);
                assert_eq!(once, enforce(tier, once));
            }
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(priority(BeliefTier::AssertedFact) > priority(BeliefTier::ObservedFact));
        assert!(priority(BeliefTier::ObservedFact) > priority(BeliefTier::Preference));
        assert!(priority(BeliefTier::Preference) > priority(BeliefTier::Hypothesis));
        assert!(priority(BeliefTier::Hypothesis) > priority(BeliefTier::TemporaryContext));
    }

    #[test]
    fn promotion_demotion_edges() {
        assert_eq!(promoted(BeliefTier::AssertedFact), None);
        assert_eq!(promoted(BeliefTier::Hypothesis), Some(BeliefTier::ObservedFact));
        assert_eq!(demoted(BeliefTier::Hypothesis), None);
        assert_eq!(demoted(BeliefTier::AssertedFact), Some(BeliefTier::ObservedFact));
    }
}
