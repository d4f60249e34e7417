//! Per-operation progress

/// Progress of one outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Sent, nothing received yet
    Pending,
    /// Intermediate messages (entries, references) received
    Draining,
    /// Terminal message received
    Done,
    /// Abandoned by the caller; further responses are discarded
    Abandoned,
}

impl OperationState {
    /// Whether responses for this operation are still accepted
    pub fn accepts_responses(&self) -> bool {
        matches!(self, OperationState::Pending | OperationState::Draining)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Draining => write!(f, "draining"),
            Self::Done => write!(f, "done"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}
