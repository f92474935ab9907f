// Connection lifecycle as an explicit state machine.
//
// `ConnectionMachine::handle` maps (state, event) to (state, effects). The
// transport actor performs the effects; nothing here touches a socket, so
// the retry budget and disconnect rules can be exercised directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection status exposed to the call orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Recording,
    Error,
}

impl ConnectionState {
    /// The socket is open and accepts messages
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Recording)
    }

    /// Label for the call surface
    pub fn status_text(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Recording => "In Call",
            ConnectionState::Error => "Connection Error",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Recording => "recording",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs to the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Caller asked to connect
    ConnectRequested,
    /// Handshake completed
    Opened,
    /// Handshake failed. A refused or timed-out handshake is followed by
    /// `Closed`; a configuration problem is not.
    OpenFailed,
    /// Socket-level error on an open connection (a close follows)
    SocketError,
    /// Connection closed without the caller asking
    Closed,
    /// Caller asked to disconnect
    DisconnectRequested,
    /// A scheduled reconnect delay elapsed
    RetryElapsed,
    /// Capture started on top of the open connection
    RecordingStarted,
}

/// Side effects the actor must perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenSocket,
    CloseSocket,
    ScheduleRetry { attempt: u32, delay: Duration },
    CancelRetry,
}

/// Fixed-delay, fixed-budget reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    retry_pending: bool,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            retry_pending: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<Effect> {
        use ConnectionState::*;

        match event {
            TransportEvent::ConnectRequested => {
                if matches!(self.state, Connecting | Connected | Recording) {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                if self.retry_pending {
                    self.retry_pending = false;
                    effects.push(Effect::CancelRetry);
                }
                self.attempts = 0;
                self.state = Connecting;
                effects.push(Effect::OpenSocket);
                effects
            }

            TransportEvent::RetryElapsed => {
                if !self.retry_pending {
                    return Vec::new();
                }
                self.retry_pending = false;
                if matches!(self.state, Connecting | Connected | Recording) {
                    return Vec::new();
                }
                self.state = Connecting;
                vec![Effect::OpenSocket]
            }

            TransportEvent::Opened => {
                if self.state != Connecting {
                    // Stale handshake that finished after a disconnect
                    return vec![Effect::CloseSocket];
                }
                self.state = Connected;
                self.attempts = 0;
                Vec::new()
            }

            TransportEvent::OpenFailed => {
                if self.state == Connecting {
                    self.state = Error;
                }
                Vec::new()
            }

            TransportEvent::SocketError => {
                if matches!(self.state, Connecting | Connected | Recording) {
                    self.state = Error;
                }
                Vec::new()
            }

            TransportEvent::Closed => {
                if self.state == Disconnected {
                    return Vec::new();
                }
                self.state = Disconnected;
                self.schedule_retry()
            }

            TransportEvent::DisconnectRequested => {
                self.attempts = self.policy.max_attempts;
                let mut effects = Vec::new();
                if self.retry_pending {
                    self.retry_pending = false;
                    effects.push(Effect::CancelRetry);
                }
                if self.state != Disconnected {
                    effects.push(Effect::CloseSocket);
                }
                self.state = Disconnected;
                effects
            }

            TransportEvent::RecordingStarted => {
                if self.state == Connected {
                    self.state = Recording;
                }
                Vec::new()
            }
        }
    }

    fn schedule_retry(&mut self) -> Vec<Effect> {
        if self.attempts >= self.policy.max_attempts {
            return Vec::new();
        }
        self.attempts += 1;
        self.retry_pending = true;
        vec![Effect::ScheduleRetry {
            attempt: self.attempts,
            delay: self.policy.delay,
        }]
    }
}
