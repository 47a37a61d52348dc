//! Connection lifecycle states.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::error::WireError;

/// State of one [`NetworkHandler`](super::NetworkHandler).
///
/// ```text
/// Initialized -> Connecting -> LoadingSession -> Ok -> Closed
///                    |              |
///                    +--------------+-----------------> Closed
/// ```
///
/// `Closed` is terminal; a new handler is needed to reconnect.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    LoadingSession { started_at: Instant },
    Ok,
    Closed { cause: Option<Arc<WireError>> },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::LoadingSession { .. } => "loading",
            ConnectionState::Ok => "ok",
            ConnectionState::Closed { .. } => "closed",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ConnectionState::Ok)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed { .. })
    }

    /// Whether the handler is still on its way to `Ok`.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::LoadingSession { .. }
        )
    }

    /// Why the handler closed, if it did so with an error.
    pub fn cause(&self) -> Option<&Arc<WireError>> {
        match self {
            ConnectionState::Closed { cause } => cause.as_ref(),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Initialized, Connecting)
                | (Initialized, Closed { .. })
                | (Connecting, LoadingSession { .. })
                | (Connecting, Closed { .. })
                | (LoadingSession { .. }, Ok)
                | (LoadingSession { .. }, Closed { .. })
                | (Ok, Closed { .. })
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause() {
            Some(cause) => write!(f, "closed ({})", cause),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<ConnectionState> {
        vec![
            ConnectionState::Initialized,
            ConnectionState::Connecting,
            ConnectionState::LoadingSession {
                started_at: Instant::now(),
            },
            ConnectionState::Ok,
            ConnectionState::Closed { cause: None },
        ]
    }

    #[test]
    fn test_every_live_state_can_close() {
        let closed = ConnectionState::Closed { cause: None };
        for state in all() {
            assert_eq!(state.can_transition_to(&closed), !state.is_closed(), "{}", state);
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        let closed = ConnectionState::Closed { cause: None };
        for next in all() {
            assert!(!closed.can_transition_to(&next));
        }
    }

    #[test]
    fn test_forward_path_only() {
        let states = all();
        for (i, from) in states.iter().enumerate() {
            for (j, to) in states.iter().enumerate() {
                let expected = (j == i + 1) || (to.is_closed() && !from.is_closed());
                assert_eq!(from.can_transition_to(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_display_cause() {
        let state = ConnectionState::Closed {
            cause: Some(Arc::new(WireError::HeartbeatFailed)),
        };
        assert_eq!(state.to_string(), "closed (heartbeat failed)");
        assert!(state.cause().is_some());
        assert_eq!(ConnectionState::Ok.to_string(), "ok");
    }
}
