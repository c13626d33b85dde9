//! Heuristic text analysis: raw message text → bounded vector deltas.
//!
//! Keyword-driven rules live in one declarative table ([`KEYWORD_RULES`]);
//! two structural rules read message length instead of content. All matching
//! is case-insensitive on word boundaries, so "against" does not trip the
//! "again" rumination cue. One category contributes at most one delta per
//! message no matter how many of its keywords appear.
//!
//! | Category | Cue | Effect |
//! |----------|-----|--------|
//! | `negative_affect` | sad, hurt, depressed, cry | valence +0.4 |
//! | `positive_affect` | good, better, happy | valence -0.3 |
//! | `panic` | panic, scared, racing, anxious | arousal +0.5 |
//! | `calming` | calm, breathe, relax, safe | arousal -0.3 |
//! | `absolutist` | never, always, pointless, give up, worthless | hopelessness +0.5, agency -0.4 |
//! | `rumination` | again, loop, keeps coming back | rumination +0.5 |
//! | `cognitive_overload` | > 30 words, or too much / confused / overwhelmed | cognitive_load +0.5 |
//! | `disengagement` | < 3 words and not a bare yes/no/ok | engagement_stability -0.3 |

use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::Dimension;

// -----------------------------------------------------------------------------
// Keyword rule table
// -----------------------------------------------------------------------------

/// One keyword-driven heuristic: if any keyword appears in the message, the
/// rule contributes its fixed delta to its dimension, once.
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    /// Stable label reported back to the host for audit logging.
    pub category: &'static str,
    /// Words or literal phrases that trigger this rule.
    pub keywords: &'static [&'static str],
    /// Dimension the delta applies to.
    pub dimension: Dimension,
    /// Signed delta, clamped into [0.0, 1.0] at application time.
    pub delta: f32,
}

const NEGATIVE_WORDS: &[&str] = &["sad", "hurt", "depressed", "cry"];
const POSITIVE_WORDS: &[&str] = &["good", "better", "happy"];
const PANIC_WORDS: &[&str] = &["panic", "scared", "racing", "anxious"];
const CALMING_WORDS: &[&str] = &["calm", "breathe", "relax", "safe"];
const ABSOLUTIST_WORDS: &[&str] = &["never", "always", "pointless", "give up", "worthless"];
const RUMINATION_WORDS: &[&str] = &["again", "loop", "keeps coming back"];
const OVERWHELM_PHRASES: &[&str] = &["too much", "confused", "overwhelmed"];

/// The ordered keyword rule table. Absolutist language carries two entries
/// under one category label: it drains agency at the same time it raises
/// hopelessness.
pub const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        category: "negative_affect",
        keywords: NEGATIVE_WORDS,
        dimension: Dimension::Valence,
        delta: 0.4,
    },
    KeywordRule {
        category: "positive_affect",
        keywords: POSITIVE_WORDS,
        dimension: Dimension::Valence,
        delta: -0.3,
    },
    KeywordRule {
        category: "panic",
        keywords: PANIC_WORDS,
        dimension: Dimension::Arousal,
        delta: 0.5,
    },
    KeywordRule {
        category: "calming",
        keywords: CALMING_WORDS,
        dimension: Dimension::Arousal,
        delta: -0.3,
    },
    KeywordRule {
        category: "absolutist",
        keywords: ABSOLUTIST_WORDS,
        dimension: Dimension::Hopelessness,
        delta: 0.5,
    },
    KeywordRule {
        category: "absolutist",
        keywords: ABSOLUTIST_WORDS,
        dimension: Dimension::Agency,
        delta: -0.4,
    },
    KeywordRule {
        category: "rumination",
        keywords: RUMINATION_WORDS,
        dimension: Dimension::Rumination,
        delta: 0.5,
    },
];

/// Messages longer than this many words read as overload.
pub const LONG_MESSAGE_WORDS: usize = 30;
/// Messages shorter than this many words read as disengaging, unless they are
/// a bare acknowledgment.
pub const SHORT_MESSAGE_WORDS: usize = 3;
/// Terse replies that do not count as disengagement.
const BARE_ACKNOWLEDGMENTS: &[&str] = &["yes", "no", "ok"];

const COGNITIVE_OVERLOAD_DELTA: f32 = 0.5;
const DISENGAGEMENT_DELTA: f32 = -0.3;

/// Forced deltas when a crisis drill fires: every distress axis pinned to its
/// worst value, agency to its floor.
pub const CRISIS_DRILL_DELTAS: &[(Dimension, f32)] = &[
    (Dimension::Arousal, 1.0),
    (Dimension::Valence, 1.0),
    (Dimension::CognitiveLoad, 1.0),
    (Dimension::Hopelessness, 1.0),
    (Dimension::Agency, -1.0),
];

// Compiled once per rule; a rule whose pattern fails to build is inert rather
// than fatal.
static KEYWORD_PATTERNS: Lazy<Vec<Option<Regex>>> = Lazy::new(|| {
    KEYWORD_RULES
        .iter()
        .map(|rule| compile_keyword_pattern(rule.keywords))
        .collect()
});

static OVERWHELM_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| compile_keyword_pattern(OVERWHELM_PHRASES));

fn compile_keyword_pattern(keywords: &[&str]) -> Option<Regex> {
    if keywords.is_empty() {
        return None;
    }
    let escaped: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
    let pattern_str = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    Regex::new(&pattern_str).ok()
}

// -----------------------------------------------------------------------------
// Analysis
// -----------------------------------------------------------------------------

/// Outcome of analyzing one message: the deltas to apply and which categories
/// produced them.
#[derive(Debug, Clone, Default)]
pub struct MessageAnalysis {
    /// Dimension deltas in rule-table order.
    pub deltas: Vec<(Dimension, f32)>,
    /// Categories that fired, deduplicated, in rule-table order.
    pub matched_categories: Vec<&'static str>,
    /// True when the crisis-drill token short-circuited the ordinary rules.
    pub crisis_drill: bool,
}

impl MessageAnalysis {
    fn crisis_drill() -> Self {
        Self {
            deltas: CRISIS_DRILL_DELTAS.to_vec(),
            matched_categories: vec!["crisis_drill"],
            crisis_drill: true,
        }
    }
}

/// Analyzes one user message into vector deltas.
///
/// `drill_token` is the opt-in crisis-drill escape hatch: when `Some` and the
/// literal token appears in the text, every ordinary rule is skipped and the
/// maximal-crisis delta set is returned instead. Production deployments pass
/// `None` (the default configuration), which makes the token inert. This path
/// exists so staging can rehearse the escalation flow end to end; it is not
/// organic heuristic logic.
pub fn analyze(text: &str, drill_token: Option<&str>) -> MessageAnalysis {
    if let Some(token) = drill_token {
        if !token.is_empty() && text.contains(token) {
            return MessageAnalysis::crisis_drill();
        }
    }

    let mut analysis = MessageAnalysis::default();

    for (rule, pattern) in KEYWORD_RULES.iter().zip(KEYWORD_PATTERNS.iter()) {
        let Some(pattern) = pattern else { continue };
        if pattern.is_match(text) {
            analysis.deltas.push((rule.dimension, rule.delta));
            if !analysis.matched_categories.contains(&rule.category) {
                analysis.matched_categories.push(rule.category);
            }
        }
    }

    let word_count = text.split_whitespace().count();

    let overwhelmed = OVERWHELM_PATTERN
        .as_ref()
        .map(|p| p.is_match(text))
        .unwrap_or(false);
    if word_count > LONG_MESSAGE_WORDS || overwhelmed {
        analysis
            .deltas
            .push((Dimension::CognitiveLoad, COGNITIVE_OVERLOAD_DELTA));
        analysis.matched_categories.push("cognitive_overload");
    }

    if word_count < SHORT_MESSAGE_WORDS && !is_bare_acknowledgment(text) {
        analysis
            .deltas
            .push((Dimension::EngagementStability, DISENGAGEMENT_DELTA));
        analysis.matched_categories.push("disengagement");
    }

    analysis
}

/// True for terse replies like "ok", "Yes.", "NO" that should not read as
/// disengagement.
fn is_bare_acknowledgment(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    BARE_ACKNOWLEDGMENTS.contains(&normalized.as_str())
}
