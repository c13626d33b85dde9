//! Constraint derivation: vector + trend → response policy.
//!
//! The policy layer never mutates state. It walks a fixed, ordered rule table
//! ([`POLICY_RULES`]) and concatenates the fragments of every rule that
//! matches; the safety-escalation branch short-circuits the table entirely.
//! Hosts splice [`PolicyDecision::prompt_context`] into the system prompt of
//! the downstream text-generation call and use `ui_mode` /
//! `safety_escalation` to adjust client-side affordances (input restriction,
//! crisis resources).

use serde::{Deserialize, Serialize};

use crate::state::{EmotionalVector, Trend};

// -----------------------------------------------------------------------------
// UI modes
// -----------------------------------------------------------------------------

/// Client-facing interaction mode. Declaration order is restrictiveness
/// order; when several rules want a mode, the most restrictive wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    /// Full conversational UI.
    #[default]
    Standard,
    /// Short prompts, binary choices only.
    SimplifiedBinary,
    /// Crisis layout: input restricted, helpline resources surfaced.
    Restricted,
}

impl UiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiMode::Standard => "standard",
            UiMode::SimplifiedBinary => "simplified_binary",
            UiMode::Restricted => "restricted",
        }
    }

    pub fn from_str(s: &str) -> Option<UiMode> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Some(UiMode::Standard),
            "simplified_binary" => Some(UiMode::SimplifiedBinary),
            "restricted" => Some(UiMode::Restricted),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Decision
// -----------------------------------------------------------------------------

/// Instruction used when no rule fires.
pub const DEFAULT_INSTRUCTION: &str = "be supportive and conversational";

/// Fixed protective instruction returned whenever safety escalation engages.
/// Kept as one immutable string so the escalation path can never be diluted
/// by fragment concatenation.
pub const ESCALATION_INSTRUCTION: &str = "Crisis pattern detected. Do not problem-solve or give \
advice. Validate the user's feelings in short, warm sentences, stay with them, and encourage \
reaching a human counsellor or local crisis line now. Never argue with or dismiss what they are \
feeling.";

/// Hopelessness floor (exclusive) for safety escalation.
pub const ESCALATION_HOPELESSNESS: f32 = 0.6;
/// Valence floor (exclusive) for safety escalation.
pub const ESCALATION_VALENCE: f32 = 0.6;

/// The structured output steering both the UI and the text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Client-facing interaction mode.
    pub ui_mode: UiMode,
    /// Behavioral guidance for the downstream model, fragment-concatenated.
    pub ai_instruction: String,
    /// True only on the guardian-angel branch; the host must surface crisis
    /// resources and restrict input affordances.
    pub safety_escalation: bool,
    /// Names of the table rules that fired, in table order. Empty on the
    /// escalation branch and on the default decision. In-process audit
    /// detail; not part of the serialized decision.
    #[serde(skip)]
    pub matched_rules: Vec<&'static str>,
}

impl Default for PolicyDecision {
    fn default() -> Self {
        Self {
            ui_mode: UiMode::Standard,
            ai_instruction: DEFAULT_INSTRUCTION.to_string(),
            safety_escalation: false,
            matched_rules: Vec::new(),
        }
    }
}

impl PolicyDecision {
    /// Bracketed steering block for splicing into a system prompt.
    pub fn prompt_context(&self) -> String {
        if self.safety_escalation {
            format!("[Safety Escalation Active] {}", self.ai_instruction)
        } else {
            format!("[Response Guidance] {}", self.ai_instruction)
        }
    }
}

/// Builds the full system prompt for the text-generation call: the host's
/// base directive followed by the policy steering block, blank-line joined.
pub fn compose_system_prompt(base_directive: &str, decision: &PolicyDecision) -> String {
    let mut parts: Vec<String> = Vec::new();
    let base = base_directive.trim();
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    parts.push(decision.prompt_context());
    parts.join("\n\n")
}

// -----------------------------------------------------------------------------
// Rule table
// -----------------------------------------------------------------------------

/// One entry of the ordered constraint table.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRule {
    /// Stable label reported on the decision for audit logging.
    pub name: &'static str,
    /// Predicate over the current vector.
    pub applies: fn(&EmotionalVector) -> bool,
    /// Instruction fragment appended when the predicate holds.
    pub fragment: &'static str,
    /// UI mode this rule asks for, if any; merged by restrictiveness.
    pub ui_mode: Option<UiMode>,
}

/// Ordered constraint rules, evaluated top to bottom after the escalation
/// check. Every matching rule contributes its fragment.
pub const POLICY_RULES: &[PolicyRule] = &[
    PolicyRule {
        name: "cognitive_overload",
        applies: |v| v.cognitive_load > 0.7,
        fragment: "simplify to short sentences, one choice at a time",
        ui_mode: Some(UiMode::SimplifiedBinary),
    },
    PolicyRule {
        name: "rumination_loop",
        applies: |v| v.rumination > 0.6,
        fragment: "do not explore the distressing thought further; redirect to sensory grounding",
        ui_mode: None,
    },
    PolicyRule {
        name: "low_agency",
        applies: |v| v.agency < 0.3,
        fragment: "offer one tiny manageable step, no advice lists",
        ui_mode: None,
    },
    PolicyRule {
        name: "disengagement",
        applies: |v| v.engagement_stability < 0.4,
        fragment: "keep messages very short and reassuring",
        ui_mode: None,
    },
    PolicyRule {
        name: "high_arousal",
        applies: |v| v.arousal > 0.7,
        fragment: "focus on grounding, calming rhythmic language",
        ui_mode: None,
    },
];

/// True when the guardian-angel branch must engage: deep hopelessness and
/// heavy negative valence while the short-term trend is still worsening.
pub fn escalation_required(vector: &EmotionalVector, trend: Trend) -> bool {
    vector.hopelessness > ESCALATION_HOPELESSNESS
        && vector.valence > ESCALATION_VALENCE
        && trend == Trend::Worsening
}

/// Derives the response policy for one turn. Pure; the escalation branch
/// returns immediately without consulting the rule table.
pub fn evaluate(vector: &EmotionalVector, trend: Trend) -> PolicyDecision {
    if escalation_required(vector, trend) {
        return PolicyDecision {
            ui_mode: UiMode::Restricted,
            ai_instruction: ESCALATION_INSTRUCTION.to_string(),
            safety_escalation: true,
            matched_rules: Vec::new(),
        };
    }

    let mut fragments: Vec<&str> = Vec::new();
    let mut matched_rules: Vec<&'static str> = Vec::new();
    let mut ui_mode = UiMode::Standard;
    for rule in POLICY_RULES {
        if (rule.applies)(vector) {
            fragments.push(rule.fragment);
            matched_rules.push(rule.name);
            if let Some(mode) = rule.ui_mode {
                ui_mode = ui_mode.max(mode);
            }
        }
    }

    if fragments.is_empty() {
        return PolicyDecision::default();
    }

    PolicyDecision {
        ui_mode,
        ai_instruction: fragments.join("; "),
        safety_escalation: false,
        matched_rules,
    }
}
