//! Connection lifecycle state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Configured, no transport yet
    Initialized,

    /// Connect in progress
    Connecting,

    /// Transport established, reader running
    Connected,

    /// StartTLS handshake in progress; no new requests are written
    NegotiatingTls,

    /// Unbound or torn down
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initialized, Connecting)
                | (Connecting, Connected)
                | (Connecting, Initialized)
                | (Connected, NegotiatingTls)
                | (NegotiatingTls, Connected)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::IllegalState(format!(
                "cannot move from {} to {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    /// Whether requests can be written
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = ConnectionState::Initialized;
        assert!(state.transition(ConnectionState::Connecting).is_ok());
        assert!(state.transition(ConnectionState::Connected).is_ok());
        assert!(state.is_usable());
    }

    #[test]
    fn test_failed_connect_returns_to_initialized() {
        let mut state = ConnectionState::Connecting;
        assert!(state.transition(ConnectionState::Initialized).is_ok());
        assert!(state.transition(ConnectionState::Connecting).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = ConnectionState::Initialized;
        let err = state.transition(ConnectionState::Connected).unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        assert_eq!(state, ConnectionState::Initialized);
    }

    #[test]
    fn test_close_from_any_state() {
        for start in [
            ConnectionState::Initialized,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::NegotiatingTls,
            ConnectionState::Closed,
        ] {
            let mut state = start;
            assert!(state.transition(ConnectionState::Closed).is_ok());
        }
    }

    #[test]
    fn test_tls_negotiation_transitions() {
        let mut state = ConnectionState::Connected;
        assert!(state.transition(ConnectionState::NegotiatingTls).is_ok());
        assert!(!state.is_usable());
        assert!(state.transition(ConnectionState::Connected).is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = ConnectionState::Closed;
        assert!(state.transition(ConnectionState::Connecting).is_err());
        assert!(state.transition(ConnectionState::Connected).is_err());
    }
}
