//! Connection state machine for homesync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the push-channel lifecycle. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening the socket, sending pings, sleeping between
//! retries) is performed by sync-client, not by this module.

use std::time::Duration;

use homesync_types::{CloseDisposition, CLOSE_NORMAL};

/// Why the connection stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The server rejected the credential (close code 4001).
    CredentialRejected,
    /// The reconnect attempt cap was reached.
    RetriesExhausted,
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// Socket open in progress.
    Connecting {
        /// Retry number of this attempt (0 for the first attempt).
        attempt: u32,
    },
    /// Socket open; keepalive running.
    Connected,
    /// Disconnected, waiting for the backoff timer.
    Reconnecting {
        /// Number of retries scheduled so far, including this one.
        attempt: u32,
    },
    /// Terminal until an explicit connect.
    Failed {
        /// Why the manager stopped.
        reason: FailureReason,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event, policy: &BackoffPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // Explicit connect: only from an idle state, always with a fresh counter
            (Self::Disconnected | Self::Failed { .. }, Event::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting { .. }, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    Action::StartKeepalive,
                    Action::EmitEvent(HubEvent::Connected),
                ],
            ),
            (Self::Connecting { attempt }, Event::ConnectFailed { error }) => {
                schedule_retry(attempt, error, policy, vec![])
            }
            (Self::Connecting { attempt }, Event::Closed { code }) => {
                on_close(attempt, code, policy, vec![])
            }

            // From Connected
            (Self::Connected, Event::Closed { code }) => {
                on_close(0, code, policy, vec![Action::StopKeepalive])
            }
            (Self::Connected, Event::TransportError { error }) => {
                schedule_retry(0, error, policy, vec![Action::StopKeepalive])
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![Action::Connect])
            }

            // Disconnect from any live state
            (Self::Connecting { .. } | Self::Reconnecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelReconnect,
                    Action::Close { code: CLOSE_NORMAL },
                    Action::EmitEvent(HubEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::StopKeepalive,
                    Action::Close { code: CLOSE_NORMAL },
                    Action::EmitEvent(HubEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Failed { .. }, Event::DisconnectRequested) => (Self::Disconnected, vec![]),

            // Invalid transitions (including a connect while busy) - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Reconnecting { .. })
    }

    /// Check if the manager has given up until the next explicit connect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Current retry counter (0 when connected or idle).
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Connecting { attempt } | Self::Reconnecting { attempt } => *attempt,
            _ => 0,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Close handling: normal and credential-rejection closes end the session.
fn on_close(
    attempt: u32,
    code: u16,
    policy: &BackoffPolicy,
    mut actions: Vec<Action>,
) -> (ConnectionState, Vec<Action>) {
    match CloseDisposition::classify(code) {
        CloseDisposition::Normal => {
            actions.push(Action::EmitEvent(HubEvent::Disconnected {
                reason: format!("closed by server ({code})"),
            }));
            (ConnectionState::Disconnected, actions)
        }
        CloseDisposition::CredentialRejected => {
            actions.push(Action::EmitEvent(HubEvent::CredentialRejected));
            (
                ConnectionState::Failed {
                    reason: FailureReason::CredentialRejected,
                },
                actions,
            )
        }
        CloseDisposition::Retry => {
            schedule_retry(attempt, format!("closed with code {code}"), policy, actions)
        }
    }
}

/// Schedule the next retry, or give up once the cap is reached.
///
/// `attempt` is the number of retries already made; the delay for this retry
/// is `policy.delay_for_attempt(attempt)`.
fn schedule_retry(
    attempt: u32,
    error: String,
    policy: &BackoffPolicy,
    mut actions: Vec<Action>,
) -> (ConnectionState, Vec<Action>) {
    if attempt >= policy.max_attempts {
        actions.push(Action::EmitEvent(HubEvent::GaveUp {
            attempts: attempt,
            error,
        }));
        return (
            ConnectionState::Failed {
                reason: FailureReason::RetriesExhausted,
            },
            actions,
        );
    }

    let delay = policy.delay_for_attempt(attempt);
    let next_attempt = attempt.saturating_add(1);
    actions.push(Action::EmitEvent(HubEvent::ConnectionLost {
        attempt: next_attempt,
        retry_in: delay,
        error,
    }));
    actions.push(Action::StartReconnectTimer { delay });
    (
        ConnectionState::Reconnecting {
            attempt: next_attempt,
        },
        actions,
    )
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller requested a connection.
    ConnectRequested,
    /// Socket opened.
    ConnectSucceeded,
    /// Socket could not be opened.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Socket closed with a close code (1006 if no close frame was seen).
    Closed {
        /// The close code.
        code: u16,
    },
    /// Socket errored while open.
    TransportError {
        /// Error message describing the failure.
        error: String,
    },
    /// Caller requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the socket.
    Connect,
    /// Close the socket with the given code.
    Close {
        /// Close code to send.
        code: u16,
    },
    /// Start the periodic ping.
    StartKeepalive,
    /// Stop the periodic ping.
    StopKeepalive,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to the application.
    EmitEvent(HubEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Push channel is open.
    Connected,
    /// Push channel closed and will not be retried.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Push channel dropped; a retry is scheduled.
    ConnectionLost {
        /// Which retry is scheduled.
        attempt: u32,
        /// Delay before the retry.
        retry_in: Duration,
        /// What went wrong.
        error: String,
    },
    /// The server rejected the credential; re-authentication is required.
    CredentialRejected,
    /// The retry cap was reached.
    GaveUp {
        /// Retries made before giving up.
        attempts: u32,
        /// Last error.
        error: String,
    },
}

/// Reconnection backoff: `min(base * 2^attempt, cap)`, at most `max_attempts` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Number of retries before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^31 * 1ms already dwarfs any sane cap; clamp the shift to avoid overflow.
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}
