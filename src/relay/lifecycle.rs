//! Connection lifecycle state machine for the outbound transport.
//!
//! ```text
//!  Disconnected ──qr──> QrPending ──authenticated──> Authenticated ──ready──> Ready
//!       ^                                                                      │
//!       └────────────────────── disconnected / auth_failure ──────────────────┘
//! ```
//!
//! [`ConnectionLifecycle::apply`] is the single transition function. It
//! mutates the state and returns the side effects the relay service must
//! perform, which keeps the transition table testable without a transport.

use std::time::Duration;

use serde::Serialize;

use crate::config::ReconnectConfig;

/// Reconnect delays never go below this, whatever the config says.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Outbound transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    QrPending,
    Authenticated,
    Ready,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::QrPending => "qr_pending",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the outbound transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Interactive login required; carries the QR payload
    QrNeeded(String),
    /// Credentials accepted
    Authenticated,
    /// Fully connected and able to send
    Ready,
    /// Connection lost
    Disconnected(String),
    /// Stored or scanned credentials were rejected
    AuthFailure(String),
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Surface a QR code to the operator
    ShowQr(String),
    /// Back up the session, off the dispatch path
    PersistSession,
    /// List chats, resolve the destination and kick the dispatch loop
    ResolveDestination,
    /// Forget the destination (closes the gate)
    ClearDestination,
    /// Ask the transport to reconnect after `delay`
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// Repeated authentication failures need operator attention
    Escalate { failures: u32, reason: String },
}

/// Exponential reconnect backoff with a floor and a ceiling.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    escalate_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms).max(MIN_RECONNECT_DELAY);
        let max = Duration::from_millis(config.max_delay_ms).max(base);
        Self {
            base,
            max,
            escalate_after: config.escalate_after.max(1),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// The state machine proper.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    reconnect_attempt: u32,
    auth_failures: u32,
    policy: ReconnectPolicy,
}

impl ConnectionLifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempt: 0,
            auth_failures: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn auth_failures(&self) -> u32 {
        self.auth_failures
    }

    /// Apply one transport event and return the actions to run, in order.
    pub fn apply(&mut self, event: LifecycleEvent) -> Vec<LifecycleAction> {
        let was_ready = self.state == ConnectionState::Ready;
        let mut actions = Vec::new();

        match event {
            LifecycleEvent::QrNeeded(code) => {
                if was_ready {
                    actions.push(LifecycleAction::ClearDestination);
                }
                self.state = ConnectionState::QrPending;
                actions.push(LifecycleAction::ShowQr(code));
            }
            LifecycleEvent::Authenticated => {
                if was_ready {
                    actions.push(LifecycleAction::ClearDestination);
                }
                self.state = ConnectionState::Authenticated;
                self.auth_failures = 0;
                actions.push(LifecycleAction::PersistSession);
            }
            LifecycleEvent::Ready => {
                self.state = ConnectionState::Ready;
                self.reconnect_attempt = 0;
                self.auth_failures = 0;
                actions.push(LifecycleAction::ResolveDestination);
            }
            LifecycleEvent::Disconnected(_) => {
                self.state = ConnectionState::Disconnected;
                actions.push(LifecycleAction::ClearDestination);
                actions.push(self.next_reconnect());
            }
            LifecycleEvent::AuthFailure(reason) => {
                self.state = ConnectionState::Disconnected;
                self.auth_failures = self.auth_failures.saturating_add(1);
                actions.push(LifecycleAction::ClearDestination);
                if self.auth_failures >= self.policy.escalate_after {
                    actions.push(LifecycleAction::Escalate {
                        failures: self.auth_failures,
                        reason,
                    });
                }
                actions.push(self.next_reconnect());
            }
        }

        actions
    }

    fn next_reconnect(&mut self) -> LifecycleAction {
        let attempt = self.reconnect_attempt;
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        LifecycleAction::ScheduleReconnect {
            attempt,
            delay: self.policy.delay(attempt),
        }
    }
}
