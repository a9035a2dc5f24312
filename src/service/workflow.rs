use serde::Serialize;
use thiserror::Error;

/// Where a confirm-before-apply action currently stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "pending", rename_all = "snake_case")]
pub enum FlowState<T> {
    Idle,
    Confirming(T),
    Applying,
}

impl<T> FlowState<T> {
    fn name(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::Confirming(_) => "confirming",
            FlowState::Applying => "applying",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} while {state}")]
pub struct WorkflowError {
    pub action: &'static str,
    pub state: &'static str,
}

/// Idle -> Confirming -> Applying -> Idle, driven by explicit commands.
/// A new request while confirming replaces the pending payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationFlow<T> {
    state: FlowState<T>,
}

impl<T> Default for ConfirmationFlow<T> {
    fn default() -> Self {
        Self {
            state: FlowState::Idle,
        }
    }
}

impl<T> ConfirmationFlow<T> {
    pub fn state(&self) -> &FlowState<T> {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, FlowState::Idle)
    }

    pub fn request(&mut self, pending: T) -> Result<(), WorkflowError> {
        if matches!(self.state, FlowState::Applying) {
            return Err(self.invalid("request"));
        }
        self.state = FlowState::Confirming(pending);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        if !matches!(self.state, FlowState::Confirming(_)) {
            return Err(self.invalid("cancel"));
        }
        self.state = FlowState::Idle;
        Ok(())
    }

    /// Hands out the pending payload and enters Applying.
    pub fn confirm(&mut self) -> Result<T, WorkflowError> {
        match std::mem::replace(&mut self.state, FlowState::Applying) {
            FlowState::Confirming(pending) => Ok(pending),
            previous => {
                self.state = previous;
                Err(self.invalid("confirm"))
            }
        }
    }

    pub fn finish(&mut self) -> Result<(), WorkflowError> {
        if !matches!(self.state, FlowState::Applying) {
            return Err(self.invalid("finish"));
        }
        self.state = FlowState::Idle;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> WorkflowError {
        WorkflowError {
            action,
            state: self.state.name(),
        }
    }
}
