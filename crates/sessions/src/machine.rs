//! Per-session state machine.
//!
//! [`transition`] is pure: it maps the current state and an event to the
//! next state plus the effects the driver must execute. `None` means the
//! event is ignored in that state.

use crate::types::{CloseReason, LifecycleState, PairingArtifact, PairingCode};

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connecting,
    Qr(String),
    PairingCode(PairingCode),
    Open { account: Option<String> },
    Close(CloseReason),
}

/// Side effect requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StoreArtifact(PairingArtifact),
    ClearArtifact,
    WriteConnectedMarker { account: Option<String> },
    Evict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: LifecycleState, effects: Vec<Effect>) -> Option<Self> {
        Some(Self { next, effects })
    }
}

pub fn transition(
    state: LifecycleState,
    event: &SessionEvent,
    now_ms: u64,
) -> Option<Transition> {
    use {LifecycleState::*, SessionEvent as E};

    if !state.is_live() {
        return None;
    }

    match (state, event) {
        (_, E::Close(_)) => Transition::to(Closed, vec![Effect::ClearArtifact, Effect::Evict]),

        (Connecting | AwaitingPairing, E::Qr(payload)) => Transition::to(
            AwaitingPairing,
            vec![Effect::StoreArtifact(PairingArtifact::Qr {
                payload: payload.clone(),
                issued_at_ms: now_ms,
            })],
        ),
        (Connecting | AwaitingPairing, E::PairingCode(code)) => Transition::to(
            AwaitingPairing,
            vec![Effect::StoreArtifact(PairingArtifact::Code(code.clone()))],
        ),
        (Connecting | AwaitingPairing, E::Open { account }) => Transition::to(
            Authenticated,
            vec![Effect::ClearArtifact, Effect::WriteConnectedMarker {
                account: account.clone(),
            }],
        ),

        // Reconnect chatter, duplicate opens and challenges after login.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn code() -> PairingCode {
        PairingCode {
            code: "123456".into(),
            issued_at_ms: 7,
            expires_in_seconds: 120,
        }
    }

    #[test]
    fn qr_moves_connecting_to_awaiting() {
        let t = transition(LifecycleState::Connecting, &SessionEvent::Qr("1@abc".into()), 9).unwrap();
        assert_eq!(t.next, LifecycleState::AwaitingPairing);
        assert_eq!(t.effects, vec![Effect::StoreArtifact(PairingArtifact::Qr {
            payload: "1@abc".into(),
            issued_at_ms: 9,
        })]);
    }

    #[test]
    fn qr_regeneration_stays_awaiting() {
        let t = transition(
            LifecycleState::AwaitingPairing,
            &SessionEvent::Qr("1@next".into()),
            10,
        )
        .unwrap();
        assert_eq!(t.next, LifecycleState::AwaitingPairing);
    }

    #[test]
    fn pairing_code_moves_to_awaiting() {
        let t = transition(LifecycleState::Connecting, &SessionEvent::PairingCode(code()), 0).unwrap();
        assert_eq!(t.next, LifecycleState::AwaitingPairing);
        assert_eq!(t.effects, vec![Effect::StoreArtifact(PairingArtifact::Code(code()))]);
    }

    #[test]
    fn open_authenticates_and_clears() {
        for from in [LifecycleState::Connecting, LifecycleState::AwaitingPairing] {
            let t = transition(from, &SessionEvent::Open { account: Some("1@s".into()) }, 0).unwrap();
            assert_eq!(t.next, LifecycleState::Authenticated);
            assert_eq!(t.effects, vec![Effect::ClearArtifact, Effect::WriteConnectedMarker {
                account: Some("1@s".into())
            }]);
        }
    }

    #[test]
    fn close_from_every_live_state() {
        for from in [
            LifecycleState::Connecting,
            LifecycleState::AwaitingPairing,
            LifecycleState::Authenticated,
        ] {
            let t = transition(from, &SessionEvent::Close(CloseReason::Stopped), 0).unwrap();
            assert_eq!(t.next, LifecycleState::Closed);
            assert_eq!(t.effects, vec![Effect::ClearArtifact, Effect::Evict]);
        }
    }

    #[test]
    fn authenticated_ignores_challenges() {
        let s = LifecycleState::Authenticated;
        assert!(transition(s, &SessionEvent::Qr("1@late".into()), 0).is_none());
        assert!(transition(s, &SessionEvent::PairingCode(code()), 0).is_none());
        assert!(transition(s, &SessionEvent::Open { account: None }, 0).is_none());
    }

    #[test]
    fn closed_and_unstarted_ignore_everything() {
        for s in [LifecycleState::Closed, LifecycleState::Unstarted] {
            assert!(transition(s, &SessionEvent::Open { account: None }, 0).is_none());
            assert!(transition(s, &SessionEvent::Qr("1@x".into()), 0).is_none());
            assert!(transition(s, &SessionEvent::Close(CloseReason::LoggedOut), 0).is_none());
        }
    }

    #[test]
    fn connecting_chatter_is_ignored() {
        assert!(transition(LifecycleState::AwaitingPairing, &SessionEvent::Connecting, 0).is_none());
    }
}
