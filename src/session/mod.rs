//! Voice session lifecycle.
//!
//! [`SessionManager`] owns a single [`VoiceSession`] and moves it through
//! the connection states below. Listening and speaking are only possible
//! while connected and never overlap.
//!
//! ```text
//! Disabled -> Connecting -> Connected <-> {Listening, Speaking}
//!                              |
//!                     connection error
//!                              v
//!                        Reconnecting -> Connected
//!                              |
//!                      attempts exhausted
//!                              v
//!                           Failed  (explicit connect() required)
//! ```

pub mod backoff;
pub mod manager;
pub mod transport;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use manager::SessionManager;
pub use transport::{
    LoopbackTransport, SilentSynthesizer, SpeechOptions, SpeechSynthesizer, SynthesizedAudio,
    Transport,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// State of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection gave up. Only an explicit `connect()` leaves this state.
    Failed,
}

/// Snapshot of the voice session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSession {
    pub enabled: bool,
    pub status: ConnectionStatus,
    pub is_listening: bool,
    pub is_processing: bool,
    pub is_speaking: bool,
    /// Fresh for every connection; `None` while disconnected.
    pub session_id: Option<Uuid>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Last error reported by the transport or the health check.
    pub error: Option<String>,
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self {
            enabled: false,
            status: ConnectionStatus::Disconnected,
            is_listening: false,
            is_processing: false,
            is_speaking: false,
            session_id: None,
            last_activity_at: None,
            reconnect_attempts: 0,
            error: None,
        }
    }
}

impl VoiceSession {
    /// Collapse the flags into one lifecycle state.
    pub fn state(&self) -> SessionState {
        if !self.enabled {
            return SessionState::Disabled;
        }
        match self.status {
            ConnectionStatus::Disconnected => SessionState::Disconnected,
            ConnectionStatus::Connecting => SessionState::Connecting,
            ConnectionStatus::Reconnecting => SessionState::Reconnecting,
            ConnectionStatus::Failed => SessionState::Failed,
            ConnectionStatus::Connected if self.is_speaking => SessionState::Speaking,
            ConnectionStatus::Connected if self.is_listening => SessionState::Listening,
            ConnectionStatus::Connected => SessionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Lifecycle state derived from a [`VoiceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Reconnecting,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disabled => "disabled",
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Notifications broadcast by the session manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    ListeningStarted,
    ListeningEnded,
    SpeakingStarted,
    SpeakingEnded,
    /// Recognized speech, ready for the command interpreter.
    Transcript { text: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_state_prefers_speaking() {
        let mut session = VoiceSession {
            enabled: true,
            status: ConnectionStatus::Connected,
            ..VoiceSession::default()
        };
        assert_eq!(session.state(), SessionState::Connected);
        session.is_listening = true;
        assert_eq!(session.state(), SessionState::Listening);
        session.is_listening = false;
        session.is_speaking = true;
        assert_eq!(session.state(), SessionState::Speaking);
    }

    #[test]
    fn disabled_overrides_status() {
        let session = VoiceSession {
            status: ConnectionStatus::Failed,
            ..VoiceSession::default()
        };
        assert_eq!(session.state(), SessionState::Disabled);
    }
}
