//! Stage lifecycle states.

use serde::{Deserialize, Serialize};

/// Position of a stage in its lifecycle.
///
/// A live stage moves `Constructed → ConfigPrepared → InputsStaged → Invoked
/// → OutputsCollected → Done`. A replayed stage passes through
/// `ConfigLoaded` first. `Failed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Constructed,
    ConfigLoaded,
    ConfigPrepared,
    InputsStaged,
    Invoked,
    OutputsCollected,
    Done,
    Failed,
}

impl StageState {
    /// Stable lower-case name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::ConfigLoaded => "config_loaded",
            Self::ConfigPrepared => "config_prepared",
            Self::InputsStaged => "inputs_staged",
            Self::Invoked => "invoked",
            Self::OutputsCollected => "outputs_collected",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `Done` and `Failed` end the lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_constructed() {
        assert_eq!(StageState::default(), StageState::Constructed);
    }

    #[test]
    fn terminal_states() {
        assert!(StageState::Done.is_terminal());
        assert!(StageState::Failed.is_terminal());
        assert!(!StageState::Invoked.is_terminal());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&StageState::OutputsCollected).unwrap();
        assert_eq!(json, "\"outputs_collected\"");
        assert_eq!(StageState::OutputsCollected.to_string(), "outputs_collected");
    }
}
