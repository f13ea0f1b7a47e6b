use crate::{mutation::error::MutationError, types::MutationId, types::QueryKey};

/// Lifecycle of one controller invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    /// Created, not yet dispatched.
    Idle,
    /// Dispatched; the outcome is unknown.
    Pending,
    /// Server confirmed the change.
    Succeeded,
    /// Validation, transport, or server rejected the change.
    Failed,
}

impl MutationState {
    /// True for `Idle -> Pending` and `Pending -> Succeeded | Failed`.
    pub fn can_transition_to(self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Pending) | (Self::Pending, Self::Succeeded) | (Self::Pending, Self::Failed)
        )
    }

    /// True once the outcome is known.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Rejected lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal mutation transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// State before the attempted step.
    pub from: MutationState,
    /// Requested state.
    pub to: MutationState,
}

/// State holder for a single invocation; discarded after settle.
#[derive(Debug)]
pub(crate) struct MutationTracker {
    id: MutationId,
    key: QueryKey,
    state: MutationState,
}

impl MutationTracker {
    pub(crate) fn new(id: MutationId, key: QueryKey) -> Self {
        Self {
            id,
            key,
            state: MutationState::Idle,
        }
    }

    pub(crate) fn advance(&mut self, next: MutationState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(mutation = self.id, key = %self.key, from = ?self.state, to = ?next, "mutation state");
        self.state = next;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> MutationState {
        self.state
    }
}

/// Result of a controller invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// Server-confirmed value.
    Succeeded(T),
    /// Classified failure; the cache holds the pre-mutation value.
    Failed(MutationError),
}

impl<T> MutationOutcome<T> {
    /// Terminal state corresponding to this outcome.
    pub fn state(&self) -> MutationState {
        match self {
            Self::Succeeded(_) => MutationState::Succeeded,
            Self::Failed(_) => MutationState::Failed,
        }
    }

    /// Returns `true` if the mutation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The classified error, if the mutation failed.
    pub fn error(&self) -> Option<&MutationError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(err) => Some(err),
        }
    }

    /// Maps the success value, preserving any failure.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MutationOutcome<U> {
        match self {
            Self::Succeeded(value) => MutationOutcome::Succeeded(f(value)),
            Self::Failed(err) => MutationOutcome::Failed(err),
        }
    }

    /// Converts the outcome into a `Result`.
    pub fn into_result(self) -> Result<T, MutationError> {
        match self {
            Self::Succeeded(value) => Ok(value),
            Self::Failed(err) => Err(err),
        }
    }
}
