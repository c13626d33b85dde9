//! The emotional-state engine: load, update, and constrain.
//!
//! One engine instance serves the whole host process. Per turn the host runs:
//!
//! 1. [`EmotionalStateEngine::load`] with the conversation's stored blobs
//!    (tolerant; malformed state degrades to defaults with a warning).
//! 2. [`EmotionalStateEngine::update_state`] with the raw message text and
//!    any explicit classifier signals. Returns a [`StateUpdate`] the host
//!    persists; the engine never touches host storage.
//! 3. [`EmotionalStateEngine::get_constraints`] to derive the
//!    [`PolicyDecision`] for the text-generation call and the client UI.
//!
//! Concurrent turns for the *same* conversation would race on
//! read-modify-write; hosts serialize them by holding a
//! [`ConversationGate`] guard across the whole cycle. The gate is in-process
//! only. Multi-worker deployments still need their own cross-process guard
//! (e.g. a version column) on the persistence step.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::analyzer::{self, MessageAnalysis};
use crate::config::EngineConfig;
use crate::policy::{self, PolicyDecision};
use crate::state::{
    Dimension, EmotionalHistory, EmotionalVector, Trend, VectorSnapshot,
};

// -----------------------------------------------------------------------------
// Host-facing input/output structs
// -----------------------------------------------------------------------------

/// Immutable input to an update: the conversation's state as last persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub vector: EmotionalVector,
    pub history: EmotionalHistory,
}

impl ConversationState {
    pub fn new(vector: EmotionalVector, history: EmotionalHistory) -> Self {
        Self { vector, history }
    }
}

/// Output of one update: the new state plus what drove it. The host persists
/// [`vector_bytes`](Self::vector_bytes) and [`history_bytes`](Self::history_bytes)
/// onto the conversation record and may audit-log the matched categories.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    /// Updated vector after all deltas.
    pub vector: EmotionalVector,
    /// Updated rolling history including the new snapshot.
    pub history: EmotionalHistory,
    /// Heuristic categories that fired on this message.
    pub matched_categories: Vec<&'static str>,
    /// True when the crisis-drill token forced this update.
    pub crisis_drill: bool,
}

impl StateUpdate {
    /// Ready-to-store serialized vector.
    pub fn vector_bytes(&self) -> Vec<u8> {
        self.vector.to_bytes()
    }

    /// Ready-to-store serialized history.
    pub fn history_bytes(&self) -> Vec<u8> {
        self.history.to_bytes()
    }

    /// The updated state as the input to the next turn. Useful for hosts that
    /// keep the conversation in memory between turns.
    pub fn into_state(self) -> ConversationState {
        ConversationState {
            vector: self.vector,
            history: self.history,
        }
    }
}

// -----------------------------------------------------------------------------
// Conversation gate
// -----------------------------------------------------------------------------

/// Per-conversation mutual exclusion, keyed by conversation id. Protects the
/// load → update → persist cycle against duplicate or retried submissions of
/// the same conversation racing each other in one process.
#[derive(Debug, Default)]
pub struct ConversationGate {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationGate {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Waits until this conversation's turn cycle is free and locks it. The
    /// returned guard is owned, so the host can hold it across await points
    /// (the LLM call, the database write) and drop it when the turn is done.
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            // Shard guard must drop before awaiting.
            let entry = self.locks.entry(conversation_id.to_string()).or_default();
            Arc::clone(entry.value())
        };
        lock.lock_owned().await
    }

    /// Non-blocking variant; `None` when another turn for this conversation
    /// is in flight.
    pub fn try_acquire(&self, conversation_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let entry = self.locks.entry(conversation_id.to_string()).or_default();
            Arc::clone(entry.value())
        };
        lock.try_lock_owned().ok()
    }

    /// Drops the lock entry for a conversation the host has closed. Call only
    /// once no further turns can arrive for this id; a turn acquiring after
    /// `forget` gets a fresh lock that does not exclude against old guards.
    pub fn forget(&self, conversation_id: &str) {
        self.locks.remove(conversation_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Engine
// -----------------------------------------------------------------------------

/// Stateless policy engine over caller-supplied conversation state. Holds
/// only configuration and the [`ConversationGate`]; all emotional state lives
/// in the host's conversation records.
#[derive(Debug, Default)]
pub struct EmotionalStateEngine {
    config: EngineConfig,
    gate: ConversationGate,
}

impl EmotionalStateEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            gate: ConversationGate::new(),
        }
    }

    /// Engine with configuration read from `MITRA_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The per-conversation turn lock.
    pub fn gate(&self) -> &ConversationGate {
        &self.gate
    }

    /// Decodes a stored vector blob. Absent or empty means a fresh
    /// conversation (defaults, no log); unreadable bytes degrade to defaults
    /// with a warning. Never fails.
    pub fn get_state(&self, conversation_id: &str, vector_blob: Option<&[u8]>) -> EmotionalVector {
        let bytes = match vector_blob {
            Some(b) if !b.is_empty() => b,
            _ => return EmotionalVector::default(),
        };
        match EmotionalVector::from_bytes(bytes) {
            Some(vector) => vector,
            None => {
                warn!(
                    target: "mitra::engine",
                    conversation = conversation_id,
                    "stored emotional state unreadable; using defaults"
                );
                EmotionalVector::default()
            }
        }
    }

    /// Decodes a stored history blob with the same tolerance as
    /// [`get_state`](Self::get_state).
    pub fn load_history(
        &self,
        conversation_id: &str,
        history_blob: Option<&[u8]>,
    ) -> EmotionalHistory {
        let bytes = match history_blob {
            Some(b) if !b.is_empty() => b,
            _ => return EmotionalHistory::default(),
        };
        match EmotionalHistory::from_bytes(bytes) {
            Some(history) => history,
            None => {
                warn!(
                    target: "mitra::engine",
                    conversation = conversation_id,
                    "stored emotional history unreadable; starting empty"
                );
                EmotionalHistory::default()
            }
        }
    }

    /// Decodes both blobs into the input struct for
    /// [`update_state`](Self::update_state).
    pub fn load(
        &self,
        conversation_id: &str,
        vector_blob: Option<&[u8]>,
        history_blob: Option<&[u8]>,
    ) -> ConversationState {
        ConversationState {
            vector: self.get_state(conversation_id, vector_blob),
            history: self.load_history(conversation_id, history_blob),
        }
    }

    /// Runs one turn's read-modify cycle: explicit signal deltas first, then
    /// heuristic deltas from the message text, every application clamped into
    /// [0.0, 1.0]; the updated vector is snapshotted onto the history under
    /// the configured FIFO cap. Unknown signal dimension names and non-finite
    /// signal deltas are ignored. The caller persists the result.
    pub fn update_state(
        &self,
        conversation_id: &str,
        state: &ConversationState,
        user_text: &str,
        explicit_signals: Option<&HashMap<String, f32>>,
    ) -> StateUpdate {
        let mut vector = state.vector.clone();

        if let Some(signals) = explicit_signals {
            for (name, delta) in signals {
                match Dimension::from_name(name) {
                    Some(_) if !delta.is_finite() => debug!(
                        target: "mitra::engine",
                        conversation = conversation_id,
                        dimension = %name,
                        "ignoring non-finite explicit signal delta"
                    ),
                    Some(dimension) => vector.apply_delta(dimension, *delta),
                    None => debug!(
                        target: "mitra::engine",
                        conversation = conversation_id,
                        dimension = %name,
                        "ignoring unknown explicit signal dimension"
                    ),
                }
            }
        }

        let analysis: MessageAnalysis = analyzer::analyze(user_text, self.config.drill_token());
        if analysis.crisis_drill {
            warn!(
                target: "mitra::engine",
                conversation = conversation_id,
                "crisis drill token detected; forcing maximal-crisis state"
            );
        }
        for (dimension, delta) in &analysis.deltas {
            vector.apply_delta(*dimension, *delta);
        }

        let mut history = state.history.clone();
        history.record(VectorSnapshot::now(vector.clone()), self.config.history_cap);

        info!(
            target: "mitra::engine",
            conversation = conversation_id,
            categories = ?analysis.matched_categories,
            valence = vector.valence,
            hopelessness = vector.hopelessness,
            "emotional state updated"
        );

        StateUpdate {
            vector,
            history,
            matched_categories: analysis.matched_categories,
            crisis_drill: analysis.crisis_drill,
        }
    }

    /// Derives the response policy for the current turn. Pure with respect to
    /// state; see [`policy::evaluate`] for the rule table.
    pub fn get_constraints(
        &self,
        conversation_id: &str,
        vector: &EmotionalVector,
        history: &EmotionalHistory,
    ) -> PolicyDecision {
        let trend = self.calculate_trend(history);
        let decision = policy::evaluate(vector, trend);
        if decision.safety_escalation {
            warn!(
                target: "mitra::engine",
                conversation = conversation_id,
                trend = trend.as_str(),
                hopelessness = vector.hopelessness,
                valence = vector.valence,
                "safety escalation engaged"
            );
        } else {
            debug!(
                target: "mitra::engine",
                conversation = conversation_id,
                ui_mode = decision.ui_mode.as_str(),
                trend = trend.as_str(),
                rules = ?decision.matched_rules,
                "constraints derived"
            );
        }
        decision
    }

    /// Trend over the two most recent snapshots of `history`.
    pub fn calculate_trend(&self, history: &EmotionalHistory) -> Trend {
        history.trend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ESCALATION_INSTRUCTION, UiMode};

    fn engine() -> EmotionalStateEngine {
        EmotionalStateEngine::new(EngineConfig::default())
    }

    #[test]
    fn get_state_tolerates_absent_empty_and_garbage_blobs() {
        let engine = engine();
        assert_eq!(
            engine.get_state("c-1", None),
            EmotionalVector::default()
        );
        assert_eq!(
            engine.get_state("c-1", Some(b"")),
            EmotionalVector::default()
        );
        assert_eq!(
            engine.get_state("c-1", Some(b"{not json")),
            EmotionalVector::default()
        );

        let stored = engine.get_state("c-1", Some(br#"{"valence": 0.8, "trust": 0.9}"#));
        assert!((stored.valence - 0.8).abs() < 1e-6);
        assert!((stored.trust_level - 0.9).abs() < 1e-6);
    }

    #[test]
    fn load_history_tolerates_garbage() {
        let engine = engine();
        assert!(engine.load_history("c-1", Some(b"oops")).is_empty());
        assert!(engine.load_history("c-1", None).is_empty());
    }

    #[test]
    fn update_applies_heuristics_and_records_history() {
        let engine = engine();
        let update = engine.update_state("c-1", &ConversationState::default(), "I feel sad today", None);
        assert!((update.vector.valence - 0.9).abs() < 1e-6);
        assert_eq!(update.history.len(), 1);
        assert_eq!(update.history.latest().unwrap().vector, update.vector);
        assert!(update.matched_categories.contains(&"negative_affect"));
        assert!(!update.crisis_drill);
    }

    #[test]
    fn explicit_signals_apply_before_heuristic_deltas() {
        let engine = engine();
        let mut signals = HashMap::new();
        signals.insert("valence".to_string(), 0.6_f32);
        let update = engine.update_state(
            "c-1",
            &ConversationState::default(),
            "feeling a bit better today",
            Some(&signals),
        );
        // 0.5 + 0.6 clamps to 1.0, then the positive-word delta lands: 0.7.
        // Heuristics-first would have given 0.8.
        assert!((update.vector.valence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn unknown_signal_dimensions_are_ignored() {
        let engine = engine();
        let mut signals = HashMap::new();
        signals.insert("mood_ring".to_string(), 0.9_f32);
        signals.insert("trust".to_string(), 0.2_f32);
        let update = engine.update_state(
            "c-1",
            &ConversationState::default(),
            "just checking in with you",
            Some(&signals),
        );
        // Legacy alias resolved, unknown name dropped.
        assert!((update.vector.trust_level - 0.7).abs() < 1e-6);
        assert_eq!(update.vector.valence, EmotionalVector::default().valence);
    }

    #[test]
    fn non_finite_signals_cannot_poison_state_or_disarm_escalation() {
        let engine = engine();
        let mut state = ConversationState::default();

        state = engine
            .update_state("c-1", &state, "actually feeling a little better now", None)
            .into_state();

        let mut signals = HashMap::new();
        signals.insert("valence".to_string(), f32::NAN);
        signals.insert("arousal".to_string(), f32::INFINITY);
        state = engine
            .update_state(
                "c-1",
                &state,
                "I feel sad and hurt today, and it is pointless to even try",
                Some(&signals),
            )
            .into_state();
        for dim in Dimension::ALL {
            let value = state.vector.get(dim);
            assert!(
                (0.0..=1.0).contains(&value),
                "{} out of bounds: {value}",
                dim.as_str()
            );
        }

        state = engine
            .update_state(
                "c-1",
                &state,
                "I cry all the time now, I am worthless and I should give up",
                None,
            )
            .into_state();

        // The poisoned signal must not mask an otherwise-escalating transcript.
        let decision = engine.get_constraints("c-1", &state.vector, &state.history);
        assert!(decision.safety_escalation);
        assert_eq!(decision.ui_mode, UiMode::Restricted);
    }

    #[test]
    fn history_cap_follows_configuration() {
        let engine = EmotionalStateEngine::new(EngineConfig::default().with_history_cap(3));
        let mut state = ConversationState::default();
        for _ in 0..5 {
            state = engine
                .update_state("c-1", &state, "just checking in with you", None)
                .into_state();
        }
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn crisis_drill_forces_maximal_state_when_enabled() {
        let engine = EmotionalStateEngine::new(EngineConfig::default().with_crisis_drill(true));
        let text = format!("routine words {}", engine.config().crisis_drill_token);
        let update = engine.update_state("c-1", &ConversationState::default(), &text, None);
        assert!(update.crisis_drill);
        assert!((update.vector.arousal - 1.0).abs() < 1e-6);
        assert!((update.vector.valence - 1.0).abs() < 1e-6);
        assert!((update.vector.cognitive_load - 1.0).abs() < 1e-6);
        assert!((update.vector.hopelessness - 1.0).abs() < 1e-6);
        assert!((update.vector.agency - 0.0).abs() < 1e-6);

        // Same text with the drill off stays organic.
        let drill_off = EmotionalStateEngine::new(EngineConfig::default());
        let quiet = drill_off.update_state("c-1", &ConversationState::default(), &text, None);
        assert!(!quiet.crisis_drill);
        assert!((quiet.vector.hopelessness - 0.0).abs() < 1e-6);
    }

    #[test]
    fn constraints_escalate_on_worsening_hopeless_state() {
        let engine = engine();
        let mut vector = EmotionalVector::default();
        vector.hopelessness = 0.7;
        vector.valence = 0.7;

        let snap = |valence: f32| {
            let mut v = EmotionalVector::default();
            v.valence = valence;
            VectorSnapshot::now(v)
        };
        let mut history = EmotionalHistory::default();
        history.record(snap(0.5), 10);
        history.record(snap(0.65), 10);
        assert_eq!(engine.calculate_trend(&history), Trend::Worsening);

        let decision = engine.get_constraints("c-1", &vector, &history);
        assert!(decision.safety_escalation);
        assert_eq!(decision.ui_mode, UiMode::Restricted);
        assert_eq!(decision.ai_instruction, ESCALATION_INSTRUCTION);
    }

    #[test]
    fn update_output_round_trips_through_blob_codecs() {
        let engine = engine();
        let update = engine.update_state(
            "c-1",
            &ConversationState::default(),
            "I feel sad today",
            None,
        );
        let reloaded = engine.load(
            "c-1",
            Some(&update.vector_bytes()),
            Some(&update.history_bytes()),
        );
        assert_eq!(reloaded.vector, update.vector);
        assert_eq!(reloaded.history, update.history);
    }

    #[tokio::test]
    async fn gate_excludes_same_conversation_only() {
        let gate = ConversationGate::new();
        let held = gate.acquire("c-1").await;
        assert!(gate.try_acquire("c-1").is_none());
        assert!(gate.try_acquire("c-2").is_some());
        drop(held);
        assert!(gate.try_acquire("c-1").is_some());
        assert_eq!(gate.len(), 2);
        gate.forget("c-2");
        assert_eq!(gate.len(), 1);
    }

    #[tokio::test]
    async fn gate_serializes_interleaved_turns() {
        let gate = Arc::new(ConversationGate::new());
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let run = |tag: &'static str| {
            let gate = Arc::clone(&gate);
            let log = Arc::clone(&log);
            async move {
                let _guard = gate.acquire("c-1").await;
                log.lock().unwrap().push(format!("{tag}:start"));
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                log.lock().unwrap().push(format!("{tag}:end"));
            }
        };

        let a = tokio::spawn(run("a"));
        let b = tokio::spawn(run("b"));
        a.await.unwrap();
        b.await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        // Whichever turn starts first must finish before the other starts.
        let first = log[0].split(':').next().unwrap().to_string();
        assert_eq!(log[1], format!("{first}:end"));
    }
}
