//! Core emotional-state types shared across the engine.
//!
//! An [`EmotionalVector`] is one bounded snapshot of a user's inferred
//! emotional condition; an [`EmotionalHistory`] is the rolling window of
//! recent snapshots a conversation carries. Both serialize to plain JSON so
//! the hosting platform can store them as opaque blobs on its conversation
//! records and hand them back on the next turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

/// Result type for strict state-blob decoding.
pub type StateResult<T> = Result<T, StateError>;

/// Errors surfaced by the strict blob codecs ([`EmotionalVector::try_from_bytes`],
/// [`EmotionalHistory::try_from_bytes`]). The engine's own load paths never use
/// these; they decode tolerantly and fall back to defaults. Hosts that want to
/// detect stored-state corruption (to alert or repair) use the strict variants.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State blob is empty")]
    EmptyBlob,

    #[error("Malformed state blob: {0}")]
    MalformedBlob(String),
}

// -----------------------------------------------------------------------------
// Dimensions
// -----------------------------------------------------------------------------

/// The eight tracked axes of [`EmotionalVector`], in canonical field order.
/// Names via [`as_str`](Dimension::as_str) match the serialized field names;
/// [`from_name`](Dimension::from_name) additionally accepts the legacy keys
/// older stored blobs and external classifiers still use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Valence,
    Arousal,
    CognitiveLoad,
    Rumination,
    Agency,
    Hopelessness,
    EngagementStability,
    TrustLevel,
}

impl Dimension {
    /// All dimensions in canonical field order.
    pub const ALL: [Dimension; 8] = [
        Dimension::Valence,
        Dimension::Arousal,
        Dimension::CognitiveLoad,
        Dimension::Rumination,
        Dimension::Agency,
        Dimension::Hopelessness,
        Dimension::EngagementStability,
        Dimension::TrustLevel,
    ];

    /// Canonical (serialized) name of this dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Valence => "valence",
            Dimension::Arousal => "arousal",
            Dimension::CognitiveLoad => "cognitive_load",
            Dimension::Rumination => "rumination",
            Dimension::Agency => "agency",
            Dimension::Hopelessness => "hopelessness",
            Dimension::EngagementStability => "engagement_stability",
            Dimension::TrustLevel => "trust_level",
        }
    }

    /// Older persisted key still accepted as a secondary source on decode.
    pub fn legacy_key(&self) -> Option<&'static str> {
        match self {
            Dimension::EngagementStability => Some("engagement"),
            Dimension::TrustLevel => Some("trust"),
            _ => None,
        }
    }

    /// Resolves a dimension from its canonical name or a legacy alias.
    /// Unknown names yield `None`; callers treat that as "ignore", not an error.
    pub fn from_name(name: &str) -> Option<Dimension> {
        let name = name.trim();
        Dimension::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == name || d.legacy_key() == Some(name))
    }
}

// -----------------------------------------------------------------------------
// EmotionalVector
// -----------------------------------------------------------------------------

fn default_valence() -> f32 {
    0.5
}

fn default_arousal() -> f32 {
    0.5
}

fn default_cognitive_load() -> f32 {
    0.2
}

fn default_agency() -> f32 {
    1.0
}

fn default_engagement_stability() -> f32 {
    1.0
}

fn default_trust_level() -> f32 {
    0.5
}

/// One snapshot of a user's inferred emotional condition within a conversation.
/// Every field lives in [0.0, 1.0]; updates are clamped deltas, never raw writes.
///
/// | Field | 0.0 means | 1.0 means | Default |
/// |-------|-----------|-----------|---------|
/// | `valence` | positive/light | negative/heavy | 0.5 |
/// | `arousal` | calm | agitated/panic | 0.5 |
/// | `cognitive_load` | clear-headed | overwhelmed | 0.2 |
/// | `rumination` | none | looping distress | 0.0 |
/// | `agency` | helpless | empowered | 1.0 |
/// | `hopelessness` | hopeful | despairing | 0.0 |
/// | `engagement_stability` | checking out | present | 1.0 |
/// | `trust_level` | guarded | open | 0.5 |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalVector {
    /// Negative affect. Rises on distress language, falls on positive language.
    #[serde(default = "default_valence")]
    pub valence: f32,
    /// Agitation level. Rises on panic language, falls on calming language.
    #[serde(default = "default_arousal")]
    pub arousal: f32,
    /// Overwhelm. Rises on long or confused messages.
    #[serde(default = "default_cognitive_load")]
    pub cognitive_load: f32,
    /// Looping/repetitive distress.
    #[serde(default)]
    pub rumination: f32,
    /// Sense of capability. Drained by absolutist/hopeless language.
    #[serde(default = "default_agency")]
    pub agency: f32,
    /// Despair level. One of the three escalation inputs.
    #[serde(default)]
    pub hopelessness: f32,
    /// Presence in the conversation. Falls on terse non-answers.
    /// Legacy stored key: `engagement`.
    #[serde(default = "default_engagement_stability")]
    pub engagement_stability: f32,
    /// Openness toward the companion. Only explicit signals move this.
    /// Legacy stored key: `trust`.
    #[serde(default = "default_trust_level")]
    pub trust_level: f32,
}

impl Default for EmotionalVector {
    fn default() -> Self {
        Self {
            valence: 0.5,
            arousal: 0.5,
            cognitive_load: 0.2,
            rumination: 0.0,
            agency: 1.0,
            hopelessness: 0.0,
            engagement_stability: 1.0,
            trust_level: 0.5,
        }
    }
}

impl EmotionalVector {
    /// Clamps all fields to [0.0, 1.0].
    pub fn clamp(&mut self) {
        for dim in Dimension::ALL {
            self.set(dim, self.get(dim).clamp(0.0, 1.0));
        }
    }

    /// Current value of one dimension.
    pub fn get(&self, dimension: Dimension) -> f32 {
        match dimension {
            Dimension::Valence => self.valence,
            Dimension::Arousal => self.arousal,
            Dimension::CognitiveLoad => self.cognitive_load,
            Dimension::Rumination => self.rumination,
            Dimension::Agency => self.agency,
            Dimension::Hopelessness => self.hopelessness,
            Dimension::EngagementStability => self.engagement_stability,
            Dimension::TrustLevel => self.trust_level,
        }
    }

    fn set(&mut self, dimension: Dimension, value: f32) {
        match dimension {
            Dimension::Valence => self.valence = value,
            Dimension::Arousal => self.arousal = value,
            Dimension::CognitiveLoad => self.cognitive_load = value,
            Dimension::Rumination => self.rumination = value,
            Dimension::Agency => self.agency = value,
            Dimension::Hopelessness => self.hopelessness = value,
            Dimension::EngagementStability => self.engagement_stability = value,
            Dimension::TrustLevel => self.trust_level = value,
        }
    }

    /// Applies one bounded delta: `new = clamp(old + delta, 0.0, 1.0)`.
    /// Non-finite deltas (NaN, infinities) are ignored; a NaN would survive
    /// the clamp and break every threshold comparison downstream.
    pub fn apply_delta(&mut self, dimension: Dimension, delta: f32) {
        if !delta.is_finite() {
            return;
        }
        let updated = (self.get(dimension) + delta).clamp(0.0, 1.0);
        self.set(dimension, updated);
    }

    /// Serializes to JSON bytes (flat name → number mapping) for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Tolerant decode from a stored blob. `None` only when the bytes are not
    /// JSON at all or not a mapping; missing fields, nulls, legacy keys, and
    /// unknown keys are all absorbed (see [`from_value`](Self::from_value)).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        match value {
            Value::Null => Some(Self::default()),
            Value::Object(_) => Some(Self::from_value(&value)),
            _ => None,
        }
    }

    /// Strict decode for hosts that want to detect corrupt stored state
    /// instead of silently defaulting. Unknown keys are still tolerated;
    /// null or non-numeric field values are not.
    pub fn try_from_bytes(bytes: &[u8]) -> StateResult<Self> {
        if bytes.is_empty() {
            return Err(StateError::EmptyBlob);
        }
        let mut vector: Self =
            serde_json::from_slice(bytes).map_err(|e| StateError::MalformedBlob(e.to_string()))?;
        vector.clamp();
        Ok(vector)
    }

    /// Default-filling decode from a JSON value. For each dimension: take the
    /// canonical key if present and numeric, else the legacy key, else the
    /// field default. Never fails; an empty or non-object value decodes to
    /// [`EmotionalVector::default`]. Out-of-range stored values are clamped.
    pub fn from_value(value: &Value) -> Self {
        let mut vector = Self::default();
        if let Some(obj) = value.as_object() {
            for dim in Dimension::ALL {
                let slot = obj
                    .get(dim.as_str())
                    .filter(|v| !v.is_null())
                    .or_else(|| dim.legacy_key().and_then(|key| obj.get(key)));
                if let Some(raw) = slot.and_then(Value::as_f64) {
                    vector.set(dim, raw as f32);
                }
            }
            vector.clamp();
        }
        vector
    }
}

// -----------------------------------------------------------------------------
// History & trend
// -----------------------------------------------------------------------------

/// One historical entry: the vector as it stood after an update, plus when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSnapshot {
    /// Capture time of this snapshot (UTC).
    pub captured_at: DateTime<Utc>,
    /// The vector as of that update.
    pub vector: EmotionalVector,
}

impl VectorSnapshot {
    /// Snapshot of `vector` stamped with the current time.
    pub fn now(vector: EmotionalVector) -> Self {
        Self {
            captured_at: Utc::now(),
            vector,
        }
    }
}

/// Short-horizon direction of the conversation, read off the two most recent
/// snapshots' valence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Valence climbing (more negative affect).
    Worsening,
    /// No meaningful valence shift, or not enough history.
    Stable,
    /// Valence falling (lighter affect).
    Improving,
}

impl Trend {
    /// Minimum valence shift between the last two snapshots that counts as a
    /// direction change; smaller moves read as stable.
    pub const VALENCE_SHIFT: f32 = 0.1;

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Worsening => "worsening",
            Trend::Stable => "stable",
            Trend::Improving => "improving",
        }
    }

    pub fn from_str(s: &str) -> Option<Trend> {
        match s.trim().to_lowercase().as_str() {
            "worsening" => Some(Trend::Worsening),
            "stable" => Some(Trend::Stable),
            "improving" => Some(Trend::Improving),
            _ => None,
        }
    }
}

/// Rolling window of recent snapshots for one conversation. Serializes as a
/// bare JSON array so the host can store it next to the vector blob. Bounded
/// FIFO: [`record`](Self::record) evicts the oldest entries past the cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionalHistory {
    pub entries: Vec<VectorSnapshot>,
}

impl EmotionalHistory {
    /// Default retention cap: the ten most recent snapshots.
    pub const DEFAULT_CAP: usize = 10;

    /// Appends a snapshot, then evicts the oldest entries beyond `cap`.
    pub fn record(&mut self, snapshot: VectorSnapshot, cap: usize) {
        self.entries.push(snapshot);
        if self.entries.len() > cap {
            let excess = self.entries.len() - cap;
            self.entries.drain(..excess);
        }
    }

    /// Most recent snapshot, if any.
    pub fn latest(&self) -> Option<&VectorSnapshot> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Trend over the two most recent snapshots' valence. Fewer than two
    /// entries reads as [`Trend::Stable`] unconditionally.
    pub fn trend(&self) -> Trend {
        let n = self.entries.len();
        if n < 2 {
            return Trend::Stable;
        }
        let previous = self.entries[n - 2].vector.valence;
        let latest = self.entries[n - 1].vector.valence;
        if latest > previous + Trend::VALENCE_SHIFT {
            Trend::Worsening
        } else if latest < previous - Trend::VALENCE_SHIFT {
            Trend::Improving
        } else {
            Trend::Stable
        }
    }

    /// Serializes to JSON bytes (array of snapshots) for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Tolerant decode from a stored blob. `None` when the bytes are not JSON
    /// or not an array; entries that fail to decode individually are skipped
    /// so one corrupt snapshot cannot take the whole window down.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        match value {
            Value::Null => Some(Self::default()),
            Value::Array(items) => {
                let entries = items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect();
                Some(Self { entries })
            }
            _ => None,
        }
    }

    /// Strict decode; any undecodable entry is an error rather than a skip.
    pub fn try_from_bytes(bytes: &[u8]) -> StateResult<Self> {
        if bytes.is_empty() {
            return Err(StateError::EmptyBlob);
        }
        serde_json::from_slice(bytes).map_err(|e| StateError::MalformedBlob(e.to_string()))
    }
}
