use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Iterating,
    Completed,
    PartialSummary,
    FatalError,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::FatalError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    PageLoaded,
    LoadFailed,
    ConfidentAnswer,
    ItemsExtracted,
    BudgetExhausted,
    ActionFailed,
    DecisionsMalformed,
    SessionLost,
    /// Final extraction pass during summary produced items.
    ExtractionRecovered,
    Summarized,
}

/// Tracks one browser run through its states.
#[derive(Debug)]
pub struct RunMachine {
    state: RunState,
}

impl Default for RunMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, event: RunEvent) -> Result<RunState> {
        let next = match (self.state, &event) {
            (RunState::Init, RunEvent::PageLoaded) => RunState::Iterating,
            (RunState::Init, RunEvent::LoadFailed | RunEvent::SessionLost) => RunState::FatalError,

            (RunState::Iterating, RunEvent::ConfidentAnswer | RunEvent::ItemsExtracted) => {
                RunState::Completed
            }
            (
                RunState::Iterating,
                RunEvent::BudgetExhausted
                | RunEvent::ActionFailed
                | RunEvent::DecisionsMalformed
                | RunEvent::SessionLost,
            ) => RunState::PartialSummary,

            (RunState::PartialSummary, RunEvent::ExtractionRecovered) => RunState::Completed,
            (RunState::PartialSummary, RunEvent::Summarized) => RunState::PartialSummary,

            _ => {
                return Err(anyhow!(
                    "Invalid run transition from {:?} with event {:?}",
                    self.state,
                    event
                ));
            }
        };

        if next != self.state {
            log::debug!("browser run {:?} -> {:?} on {:?}", self.state, next, event);
        }
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = RunMachine::new();
        assert_eq!(machine.transition(RunEvent::PageLoaded).unwrap(), RunState::Iterating);
        assert_eq!(
            machine.transition(RunEvent::ItemsExtracted).unwrap(),
            RunState::Completed
        );
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_load_failure_is_fatal() {
        let mut machine = RunMachine::new();
        machine.transition(RunEvent::LoadFailed).unwrap();
        assert_eq!(machine.state(), RunState::FatalError);
    }

    #[test]
    fn test_session_lost_after_load_is_partial() {
        let mut machine = RunMachine::new();
        machine.transition(RunEvent::SessionLost).unwrap();
        assert_eq!(machine.state(), RunState::FatalError);

        let mut machine = RunMachine::new();
        machine.transition(RunEvent::PageLoaded).unwrap();
        machine.transition(RunEvent::SessionLost).unwrap();
        assert_eq!(machine.state(), RunState::PartialSummary);
        machine.transition(RunEvent::Summarized).unwrap();
        assert!(!machine.state().is_terminal());
    }

    #[test]
    fn test_partial_summary_can_recover() {
        let mut machine = RunMachine::new();
        machine.transition(RunEvent::PageLoaded).unwrap();
        machine.transition(RunEvent::BudgetExhausted).unwrap();
        assert_eq!(machine.state(), RunState::PartialSummary);
        machine.transition(RunEvent::ExtractionRecovered).unwrap();
        assert_eq!(machine.state(), RunState::Completed);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = RunMachine::new();
        assert!(machine.transition(RunEvent::ConfidentAnswer).is_err());
        assert_eq!(machine.state(), RunState::Init);

        machine.transition(RunEvent::LoadFailed).unwrap();
        assert!(machine.transition(RunEvent::PageLoaded).is_err());
    }
}
