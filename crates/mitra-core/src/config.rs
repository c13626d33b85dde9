//! Engine configuration loaded from environment.
//!
//! Runtime toggles only; the engine has no config file of its own. The
//! crisis-drill flag exists so staging deployments can rehearse the
//! escalation flow with a production binary. Leave it off in production.

use serde::{Deserialize, Serialize};

use crate::state::EmotionalHistory;

fn default_history_cap() -> usize {
    EmotionalHistory::DEFAULT_CAP
}

fn default_drill_token() -> String {
    DEFAULT_CRISIS_DRILL_TOKEN.to_string()
}

/// Literal token that forces a maximal-crisis update when the drill is
/// enabled. Deliberately unpronounceable so it cannot appear in organic text.
pub const DEFAULT_CRISIS_DRILL_TOKEN: &str = "__crisis_drill__";

/// Engine configuration loaded from environment.
///
/// | Env | Default | Description |
/// |-----|---------|--------------|
/// | MITRA_HISTORY_CAP | 10 | Snapshots retained per conversation (FIFO bound, minimum 1). |
/// | MITRA_CRISIS_DRILL_ENABLED | false | Enables the crisis-drill token escape hatch. Staging/demo only. |
/// | MITRA_CRISIS_DRILL_TOKEN | `__crisis_drill__` | Literal token that triggers the drill when enabled. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// MITRA_HISTORY_CAP: How many snapshots each conversation retains.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// MITRA_CRISIS_DRILL_ENABLED: When true, the drill token in a message
    /// forces the maximal-crisis delta set. Never enable in production.
    #[serde(default)]
    pub crisis_drill_enabled: bool,
    /// MITRA_CRISIS_DRILL_TOKEN: Token the drill matches on (literal, case-sensitive).
    #[serde(default = "default_drill_token")]
    pub crisis_drill_token: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_cap: EmotionalHistory::DEFAULT_CAP,
            crisis_drill_enabled: false,
            crisis_drill_token: DEFAULT_CRISIS_DRILL_TOKEN.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load toggles from environment. Unset or invalid => defaults (see struct field docs).
    pub fn from_env() -> Self {
        Self {
            history_cap: env_history_cap(),
            crisis_drill_enabled: env_bool("MITRA_CRISIS_DRILL_ENABLED", false),
            crisis_drill_token: env_opt_string("MITRA_CRISIS_DRILL_TOKEN")
                .unwrap_or_else(|| DEFAULT_CRISIS_DRILL_TOKEN.to_string()),
        }
    }

    /// The drill token the analyzer should honor, or `None` when the drill is off.
    pub fn drill_token(&self) -> Option<&str> {
        self.crisis_drill_enabled
            .then(|| self.crisis_drill_token.as_str())
    }

    /// Overrides the history cap (floored at 1).
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Toggles the crisis drill.
    pub fn with_crisis_drill(mut self, enabled: bool) -> Self {
        self.crisis_drill_enabled = enabled;
        self
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || (v.trim().is_empty() && default),
        Err(_) => default,
    }
}

fn env_history_cap() -> usize {
    match std::env::var("MITRA_HISTORY_CAP") {
        Ok(v) => v
            .trim()
            .parse()
            .unwrap_or(EmotionalHistory::DEFAULT_CAP)
            .max(1),
        Err(_) => EmotionalHistory::DEFAULT_CAP,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
