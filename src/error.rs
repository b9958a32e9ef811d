//! Error types for voice session control and command interpretation.

use crate::safety::RiskLevel;

/// Top-level error type for the voice command system.
#[derive(Debug, thiserror::Error)]
pub enum VoiceCommandError {
    /// The operation is not valid for the current session state.
    #[error("session state error: {0}")]
    SessionState(String),

    /// The transport could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// No registered command matched the input with enough confidence.
    #[error("no command matched {text:?} with enough confidence")]
    ParseLowConfidence {
        /// The raw input that failed to match.
        text: String,
        /// Best score seen, if any command scored at all.
        best_score: Option<f32>,
    },

    /// The safety gate refused to run the command.
    #[error("command {command_id} blocked ({risk}): {reason}")]
    SafetyBlocked {
        /// Identifier of the refused command.
        command_id: String,
        /// Risk level that triggered the block.
        risk: RiskLevel,
        /// Human-readable reason for the block.
        reason: String,
    },

    /// A command handler failed. The dispatcher turns this into a failed
    /// `ExecutionResult` carrying [`VoiceCommandError::user_message`].
    #[error("handler {handler_id} failed: {message}")]
    HandlerExecution {
        /// Display name of the command being run.
        command: String,
        /// Handler identifier that failed.
        handler_id: String,
        /// Error text reported by the handler.
        message: String,
    },

    /// Command registration error (duplicate or unknown id).
    #[error("registry error: {0}")]
    Registry(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Usage persistence error.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceCommandError {
    /// Message suitable for showing (or speaking) to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::ParseLowConfidence { .. } => "Sorry, I didn't understand that.".to_owned(),
            Self::SafetyBlocked { reason, .. } => format!("I can't do that: {reason}"),
            Self::HandlerExecution { command, message, .. } => {
                format!("'{command}' failed: {message}")
            }
            Self::SessionState(msg) => format!("Voice control isn't ready: {msg}"),
            Self::Connection(_) => {
                "I lost the connection. Trying to reconnect.".to_owned()
            }
            other => other.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceCommandError>;
