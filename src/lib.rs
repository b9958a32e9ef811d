//! voxcmd: voice session lifecycle and natural-language command interpreter.
//!
//! Two pieces do the work:
//!
//! - **[`SessionManager`]** keeps a voice connection usable across flaky
//!   network and audio conditions: enable/disable, connect/disconnect,
//!   listen/speak, periodic health checks, and reconnection with
//!   exponential backoff.
//! - **[`CommandInterpreter`]** turns free text into an executed action:
//!   context-scoped parsing, risk gating, confirmation, dispatch, and usage
//!   tracking.
//!
//! ```text
//! ContextTracker -> CommandParser -> SafetyGate -> Approver -> CommandDispatcher -> UsageStore
//! ```
//!
//! Audio capture, speech synthesis, and the host application's actual
//! features are collaborators behind traits ([`session::Transport`],
//! [`session::SpeechSynthesizer`], [`dispatcher::CommandHandler`],
//! [`approval::Approver`], [`usage::UsageBackend`]).

pub mod approval;
pub mod commands;
pub mod config;
pub mod console;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod interpreter;
pub mod logging;
pub mod parser;
pub mod safety;
pub mod session;
pub mod usage;

pub use approval::{ApprovalDecision, Approver, ChannelApprover, CommandApprovalRequest};
pub use commands::{Command, CommandCategory, CommandRegistry};
pub use config::VoiceControlConfig;
pub use console::Console;
pub use context::{ContextInfo, ContextTracker, ContextType, ManualContextTracker};
pub use dispatcher::{CommandDispatcher, ExecutionResult, HandlerRegistry};
pub use error::{Result, VoiceCommandError};
pub use interpreter::CommandInterpreter;
pub use parser::{CommandParser, ParsedCommand};
pub use safety::{SafetyGate, SafetyLevel};
pub use session::{SessionEvent, SessionManager, SessionState, VoiceSession};
pub use usage::UsageStore;
