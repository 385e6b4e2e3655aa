use serde::Serialize;

/// Stages of one run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Collecting,
    Scoring,
    Extracting,
    Geocoding,
    Committing,
}

impl RunStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Collecting => "collecting",
            RunStage::Scoring => "scoring",
            RunStage::Extracting => "extracting",
            RunStage::Geocoding => "geocoding",
            RunStage::Committing => "committing",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable scheduler state. `Failed` is held only until the failure has
/// been logged; the coordinator then returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running(RunStage),
    Failed(RunStage),
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running(stage) => write!(f, "{stage}"),
            RunState::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_labels() {
        assert_eq!(RunState::Idle.to_string(), "idle");
        assert_eq!(RunState::Running(RunStage::Scoring).to_string(), "scoring");
        assert_eq!(
            RunState::Failed(RunStage::Committing).to_string(),
            "failed(committing)"
        );
    }

    #[test]
    fn stage_labels_match_journal_values() {
        assert_eq!(RunStage::Collecting.as_str(), "collecting");
        assert_eq!(RunStage::Committing.to_string(), "committing");
    }

    #[test]
    fn stage_serializes_lowercase() {
        let json = serde_json::to_string(&RunStage::Geocoding).unwrap();
        assert_eq!(json, "\"geocoding\"");
    }
}
