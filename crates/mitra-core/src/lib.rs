//! mitra-core: emotional-state tracking and escalation decisions for the
//! MindMitra support platform.
//!
//! Per conversation the engine keeps an 8-dimensional bounded mood vector and
//! a rolling snapshot history, updates them heuristically from each user
//! message, and derives response constraints (AI steering instruction, UI
//! mode, safety-escalation flag) for the chat pipeline. Persistence, routing,
//! and the LLM call itself stay with the host; this crate only computes.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod policy;
pub mod state;

// State model: vector, snapshots, rolling history, trend
pub use state::{
    Dimension, EmotionalHistory, EmotionalVector, StateError, StateResult, Trend, VectorSnapshot,
};

// Heuristic text analysis
pub use analyzer::{
    KeywordRule, MessageAnalysis, CRISIS_DRILL_DELTAS, KEYWORD_RULES, LONG_MESSAGE_WORDS,
    SHORT_MESSAGE_WORDS,
};

// Policy derivation and prompt composition
pub use policy::{
    compose_system_prompt, PolicyDecision, PolicyRule, UiMode, DEFAULT_INSTRUCTION,
    ESCALATION_HOPELESSNESS, ESCALATION_INSTRUCTION, ESCALATION_VALENCE, POLICY_RULES,
};

// Engine and host-facing input/output structs
pub use engine::{
    ConversationGate, ConversationState, EmotionalStateEngine, StateUpdate,
};

// Configuration
pub use config::{EngineConfig, DEFAULT_CRISIS_DRILL_TOKEN};
