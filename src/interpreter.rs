//! Text in, executed command out.
//!
//! [`CommandInterpreter`] wires the pipeline together: the active context
//! scopes parsing, the safety gate decides whether the parsed command may
//! run, the approver resolves confirmations, and the dispatcher executes
//! and records the outcome.

use crate::approval::{ApprovalDecision, Approver};
use crate::commands::CommandRegistry;
use crate::config::{SafetyConfig, VoiceControlConfig};
use crate::context::ContextTracker;
use crate::dispatcher::{CommandDispatcher, ExecutionResult, HandlerRegistry};
use crate::error::{Result, VoiceCommandError};
use crate::parser::{CommandParser, ParsedCommand};
use crate::safety::{SafetyDecision, SafetyGate, SafetyOutcome};
use crate::usage::UsageStore;
use std::sync::{Arc, RwLock};

/// Runs free text through parse, gate, confirm, and dispatch.
pub struct CommandInterpreter {
    parser: CommandParser,
    tracker: Arc<dyn ContextTracker>,
    gate: RwLock<SafetyGate>,
    approver: Arc<dyn Approver>,
    dispatcher: CommandDispatcher,
}

impl std::fmt::Debug for CommandInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInterpreter")
            .field("parser", &self.parser)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl CommandInterpreter {
    pub fn new(
        registry: Arc<CommandRegistry>,
        tracker: Arc<dyn ContextTracker>,
        gate: SafetyGate,
        approver: Arc<dyn Approver>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Self {
            parser: CommandParser::new(registry),
            tracker,
            gate: RwLock::new(gate),
            approver,
            dispatcher,
        }
    }

    /// Build an interpreter from configuration. A usage file that cannot
    /// be loaded is logged and usage is tracked in memory instead.
    pub fn from_config(
        config: &VoiceControlConfig,
        registry: Arc<CommandRegistry>,
        tracker: Arc<dyn ContextTracker>,
        handlers: Arc<HandlerRegistry>,
        approver: Arc<dyn Approver>,
    ) -> Self {
        let usage = UsageStore::load_or_in_memory(config.commands.usage_path.as_deref());
        let dispatcher =
            CommandDispatcher::new(handlers, usage, config.commands.max_command_history);
        Self::new(
            registry,
            tracker,
            SafetyGate::new(config.safety.clone()),
            approver,
            dispatcher,
        )
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Replace the safety settings used for subsequent commands.
    pub fn update_settings(&self, safety: SafetyConfig) {
        tracing::info!(level = %safety.level, "safety settings updated");
        self.gate
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .update_config(safety);
    }

    /// Parse `text` in the current context without running anything.
    pub fn preview(&self, text: &str) -> Option<(ParsedCommand, SafetyDecision)> {
        let context = self.tracker.current_context();
        let parsed = self.parser.parse(text, context.scope())?;
        let decision = self.evaluate(&parsed);
        Some((parsed, decision))
    }

    /// Interpret and, if allowed, execute `text`.
    ///
    /// A handler failure or a declined confirmation is an `Ok` result with
    /// `success == false`.
    ///
    /// # Errors
    ///
    /// [`VoiceCommandError::ParseLowConfidence`] when nothing matches and
    /// [`VoiceCommandError::SafetyBlocked`] when the gate refuses.
    pub async fn handle(&self, text: &str) -> Result<ExecutionResult> {
        let context = self.tracker.current_context();
        let Some(parsed) = self.parser.parse(text, context.scope()) else {
            return Err(VoiceCommandError::ParseLowConfidence {
                text: text.trim().to_owned(),
                best_score: self.parser.best_score(text, context.scope()),
            });
        };

        let decision = self.evaluate(&parsed);
        let command_id = parsed.command.id.clone();
        tracing::debug!(
            command_id = %command_id,
            outcome = ?decision.outcome,
            risk = %decision.risk,
            "safety decision"
        );

        match decision.outcome {
            SafetyOutcome::Block => {
                tracing::warn!(
                    command_id = %command_id,
                    risk = %decision.risk,
                    reason = %decision.reason,
                    "command blocked"
                );
                Err(VoiceCommandError::SafetyBlocked {
                    command_id,
                    risk: decision.risk,
                    reason: decision.reason,
                })
            }
            SafetyOutcome::Confirm => {
                let answer = self
                    .approver
                    .request_approval(&parsed, decision.risk, &decision.reason)
                    .await;
                match answer {
                    ApprovalDecision::Approve => {
                        tracing::info!(command_id = %command_id, "command confirmed");
                        Ok(self.dispatcher.dispatch(&parsed, &context).await)
                    }
                    ApprovalDecision::Deny { reason } => {
                        tracing::info!(command_id = %command_id, "command declined");
                        Ok(self.dispatcher.record_denied(&parsed, reason.as_deref()).await)
                    }
                }
            }
            SafetyOutcome::Proceed => Ok(self.dispatcher.dispatch(&parsed, &context).await),
        }
    }

    /// Up to `limit` suggested command ids, most useful first.
    pub fn suggestions(&self, limit: usize) -> Vec<String> {
        self.dispatcher.usage().suggestions(limit)
    }

    /// Help lines for the current context.
    pub fn help_lines(&self) -> Vec<String> {
        let context = self.tracker.current_context();
        self.parser.registry().help_lines(context.scope())
    }

    fn evaluate(&self, parsed: &ParsedCommand) -> SafetyDecision {
        self.gate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .evaluate(&parsed.command)
    }
}

/// Suggestion for input that matched nothing, based on topical words.
pub fn unknown_command_hint(text: &str) -> String {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    let mentions = |topics: &[&str]| words.iter().any(|w| topics.contains(&w.as_str()));

    if mentions(&["task", "tasks", "todo", "reminder"]) {
        "Try saying 'create task called groceries' or 'show my tasks'.".to_owned()
    } else if mentions(&["file", "files", "code"]) {
        "Try saying 'open the file main.rs' or 'run tests'.".to_owned()
    } else if mentions(&["browser", "website", "search", "web"]) {
        "Try saying 'search the web for rust' or 'open the website example.com'.".to_owned()
    } else if mentions(&["message", "messages", "text", "email"]) {
        "Try saying 'read my messages' or 'send message to bob'.".to_owned()
    } else {
        "Say 'help' to hear what you can do here.".to_owned()
    }
}
