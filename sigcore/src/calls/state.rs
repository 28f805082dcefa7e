//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::call::{CallDirection, CallId, EndCallReason, Participant};

/// Phase of a call session.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum CallPhase {
    /// Session created, nothing sent or received yet.
    #[default]
    Idle,
    /// Incoming call: ringing locally.
    Ringing { received_at: DateTime<Utc> },
    /// Outgoing call sent, or incoming call accepted; waiting for the other side.
    Connecting { since: DateTime<Utc> },
    /// Both parties joined.
    Connected { connected_at: DateTime<Utc> },
    /// Call over after having been set up or declined.
    Ended {
        reason: EndCallReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
    /// Call never connected.
    Failed {
        reason: EndCallReason,
        failed_at: DateTime<Utc>,
    },
}

impl CallPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. })
    }

    /// Ringing, Connecting or Connected.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Ringing { .. } | Self::Connecting { .. } | Self::Connected { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended { .. } | Self::Failed { .. })
    }

    pub fn can_accept(&self) -> bool {
        self.is_ringing()
    }

    pub fn can_decline(&self) -> bool {
        matches!(self, Self::Ringing { .. } | Self::Connecting { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing { .. } => "ringing",
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Ended { .. } => "ended",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Inputs that move a session between phases.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTransition {
    /// We sent `call_initiate`.
    LocalInitiated,
    /// `incoming_call` received.
    IncomingReceived,
    /// We accepted a ringing call.
    LocalAccepted,
    /// Our accept went out, or the peer sent `call_accepted` / `user_joined`.
    Joined,
    /// We declined or cancelled before the call connected.
    LocalDeclined,
    /// Peer sent `call_reject`.
    RemoteRejected,
    /// We hung up a connected call.
    LocalHangUp,
    /// Peer sent `call_ended`.
    RemoteEnded,
    /// No accept within the connect timeout.
    TimedOut,
    /// The signaling connection dropped while connecting.
    TransportLost,
    AudioMuteChanged { muted: bool },
    VideoStateChanged { off: bool },
}

/// Client-side record of one call attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub call_id: CallId,
    pub counterpart: Participant,
    pub supervision_id: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Set when the phase enters Connected.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds counted while Connected.
    pub elapsed_secs: u64,
    /// Outside every declared supervision window. Decided by the orchestrator.
    pub is_emergency: bool,
    pub muted: bool,
    pub camera_off: bool,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outgoing(
        call_id: CallId,
        counterpart: Participant,
        supervision_id: impl Into<String>,
    ) -> Self {
        Self::new(call_id, counterpart, supervision_id.into(), CallDirection::Outgoing)
    }

    pub fn new_incoming(
        call_id: CallId,
        counterpart: Participant,
        supervision_id: impl Into<String>,
    ) -> Self {
        Self::new(call_id, counterpart, supervision_id.into(), CallDirection::Incoming)
    }

    fn new(
        call_id: CallId,
        counterpart: Participant,
        supervision_id: String,
        direction: CallDirection,
    ) -> Self {
        Self {
            call_id,
            counterpart,
            supervision_id,
            direction,
            phase: CallPhase::Idle,
            started_at: None,
            elapsed_secs: 0,
            is_emergency: false,
            muted: false,
            camera_off: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Advances the elapsed-time counter by one second. Only counts while
    /// Connected; returns whether it counted.
    pub fn tick(&mut self) -> bool {
        if self.phase.is_connected() {
            self.elapsed_secs += 1;
            true
        } else {
            false
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let now = Utc::now();
        let ended = |reason| CallPhase::Ended {
            reason,
            ended_at: now,
            duration_secs: None,
        };
        let failed = |reason| CallPhase::Failed {
            reason,
            failed_at: now,
        };

        let new_phase = match (&self.phase, transition) {
            (CallPhase::Idle, CallTransition::LocalInitiated) if self.is_initiator() => {
                CallPhase::Connecting { since: now }
            }
            (CallPhase::Idle, CallTransition::IncomingReceived) if !self.is_initiator() => {
                CallPhase::Ringing { received_at: now }
            }
            (CallPhase::Ringing { .. }, CallTransition::LocalAccepted) => {
                CallPhase::Connecting { since: now }
            }
            (CallPhase::Ringing { .. }, CallTransition::LocalDeclined) => {
                ended(EndCallReason::Declined)
            }
            (
                CallPhase::Ringing { .. },
                CallTransition::RemoteRejected | CallTransition::RemoteEnded,
            ) => ended(EndCallReason::RemoteRejected),
            (CallPhase::Connecting { .. }, CallTransition::Joined) => {
                self.started_at = Some(now);
                self.elapsed_secs = 0;
                CallPhase::Connected { connected_at: now }
            }
            (CallPhase::Connecting { .. }, CallTransition::LocalDeclined) => {
                ended(EndCallReason::Declined)
            }
            (CallPhase::Connecting { .. }, CallTransition::RemoteEnded) => {
                ended(EndCallReason::RemoteHangUp)
            }
            (CallPhase::Connecting { .. }, CallTransition::RemoteRejected) => {
                failed(EndCallReason::RemoteRejected)
            }
            (CallPhase::Connecting { .. }, CallTransition::TimedOut) => {
                failed(EndCallReason::Timeout)
            }
            (CallPhase::Connecting { .. }, CallTransition::TransportLost) => {
                failed(EndCallReason::TransportLost)
            }
            (
                CallPhase::Connected { connected_at },
                t @ (CallTransition::LocalHangUp | CallTransition::RemoteEnded),
            ) => {
                let reason = if t == CallTransition::LocalHangUp {
                    EndCallReason::LocalHangUp
                } else {
                    EndCallReason::RemoteHangUp
                };
                CallPhase::Ended {
                    reason,
                    ended_at: now,
                    duration_secs: Some(now.signed_duration_since(*connected_at).num_seconds()),
                }
            }
            (CallPhase::Connected { .. }, CallTransition::AudioMuteChanged { muted }) => {
                self.muted = muted;
                return Ok(());
            }
            (CallPhase::Connected { .. }, CallTransition::VideoStateChanged { off }) => {
                self.camera_off = off;
                return Ok(());
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: current.name().to_string(),
                    attempted: format!("{transition:?}"),
                });
            }
        };
        self.phase = new_phase;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
