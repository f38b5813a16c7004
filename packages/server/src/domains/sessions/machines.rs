use tracing::debug;

use super::events::TransportEvent;
use super::models::SessionStatus;

/// Side effects requested by a state transition. The lifecycle manager
/// executes them; the machine itself never touches the registry or storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Encode the payload, cache it on the registry entry, mirror `qr` and
    /// answer a pending generate request
    PublishPairingCode(String),
    /// Mirror a non-terminal status to durable storage
    MirrorStatus(SessionStatus),
    /// Mark the registry entry ready, clear the artifact, mirror `ready`
    MarkReady,
    /// Mirror the terminal status, clean up, drop the registry entry
    Terminate { status: SessionStatus, reason: String },
}

/// Pure transition function: `(state, event) -> (state, effects)`.
///
/// Events that make no sense for the current state leave it unchanged and
/// produce no effects.
pub fn transition(
    state: SessionStatus,
    event: &TransportEvent,
) -> (SessionStatus, Vec<SessionEffect>) {
    use SessionStatus::*;

    if state.is_terminal() {
        return (state, vec![]);
    }

    match (state, event) {
        (Initializing | Qr, TransportEvent::PairingCode(payload)) => {
            (Qr, vec![SessionEffect::PublishPairingCode(payload.clone())])
        }
        (Initializing | Qr, TransportEvent::Authenticated) => {
            (Authenticated, vec![SessionEffect::MirrorStatus(Authenticated)])
        }
        (Initializing | Qr | Authenticated, TransportEvent::Ready) => {
            (Ready, vec![SessionEffect::MarkReady])
        }
        (_, TransportEvent::AuthFailure(reason)) => (
            AuthFailure,
            vec![SessionEffect::Terminate {
                status: AuthFailure,
                reason: reason.clone(),
            }],
        ),
        (_, TransportEvent::Disconnected(reason)) => (
            Disconnected,
            vec![SessionEffect::Terminate {
                status: Disconnected,
                reason: reason.clone(),
            }],
        ),
        (state, _) => (state, vec![]),
    }
}

/// Session machine - tracks one session instance's state across events
pub struct SessionMachine {
    state: SessionStatus,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionStatus::Initializing,
        }
    }

    pub fn state(&self) -> SessionStatus {
        self.state
    }

    pub fn decide(&mut self, event: &TransportEvent) -> Vec<SessionEffect> {
        let (next, effects) = transition(self.state, event);
        if effects.is_empty() {
            debug!(state = %self.state, ?event, "Ignoring transport event");
        }
        self.state = next;
        effects
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = SessionMachine::new();

        assert_eq!(
            machine.decide(&TransportEvent::PairingCode("A".to_string())),
            vec![SessionEffect::PublishPairingCode("A".to_string())]
        );
        assert_eq!(machine.state(), SessionStatus::Qr);

        assert_eq!(
            machine.decide(&TransportEvent::Authenticated),
            vec![SessionEffect::MirrorStatus(SessionStatus::Authenticated)]
        );
        assert_eq!(machine.state(), SessionStatus::Authenticated);

        assert_eq!(
            machine.decide(&TransportEvent::Ready),
            vec![SessionEffect::MarkReady]
        );
        assert_eq!(machine.state(), SessionStatus::Ready);
    }

    #[test]
    fn test_refreshed_pairing_code_republishes() {
        let (state, effects) = transition(
            SessionStatus::Qr,
            &TransportEvent::PairingCode("B".to_string()),
        );
        assert_eq!(state, SessionStatus::Qr);
        assert_eq!(
            effects,
            vec![SessionEffect::PublishPairingCode("B".to_string())]
        );
    }

    #[test]
    fn test_restored_session_goes_straight_to_ready() {
        let (state, effects) = transition(SessionStatus::Initializing, &TransportEvent::Ready);
        assert_eq!(state, SessionStatus::Ready);
        assert_eq!(effects, vec![SessionEffect::MarkReady]);
    }

    #[test]
    fn test_disconnect_from_any_live_state_terminates() {
        for state in [
            SessionStatus::Initializing,
            SessionStatus::Qr,
            SessionStatus::Authenticated,
            SessionStatus::Ready,
        ] {
            let (next, effects) =
                transition(state, &TransportEvent::Disconnected("LOGOUT".to_string()));
            assert_eq!(next, SessionStatus::Disconnected);
            assert_eq!(
                effects,
                vec![SessionEffect::Terminate {
                    status: SessionStatus::Disconnected,
                    reason: "LOGOUT".to_string(),
                }]
            );
        }
    }

    #[test]
    fn test_auth_failure_terminates() {
        let (next, effects) = transition(
            SessionStatus::Qr,
            &TransportEvent::AuthFailure("bad credentials".to_string()),
        );
        assert_eq!(next, SessionStatus::AuthFailure);
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Terminate {
                status: SessionStatus::AuthFailure,
                ..
            }]
        ));
    }

    #[test]
    fn test_terminal_states_ignore_everything() {
        for state in [SessionStatus::Disconnected, SessionStatus::AuthFailure] {
            for event in [
                TransportEvent::PairingCode("A".to_string()),
                TransportEvent::Authenticated,
                TransportEvent::Ready,
                TransportEvent::Disconnected("again".to_string()),
            ] {
                let (next, effects) = transition(state, &event);
                assert_eq!(next, state);
                assert!(effects.is_empty());
            }
        }
    }

    #[test]
    fn test_ready_ignores_late_pairing_events() {
        for event in [
            TransportEvent::PairingCode("late".to_string()),
            TransportEvent::Authenticated,
            TransportEvent::Ready,
        ] {
            let (next, effects) = transition(SessionStatus::Ready, &event);
            assert_eq!(next, SessionStatus::Ready);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_authenticated_ignores_new_pairing_code() {
        let (next, effects) = transition(
            SessionStatus::Authenticated,
            &TransportEvent::PairingCode("X".to_string()),
        );
        assert_eq!(next, SessionStatus::Authenticated);
        assert!(effects.is_empty());
    }
}
