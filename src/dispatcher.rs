//! Runs the handler bound to an approved command and records the outcome.

use crate::context::ContextInfo;
use crate::error::VoiceCommandError;
use crate::parser::ParsedCommand;
use crate::usage::UsageStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Outcome of running (or refusing to run) a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_confirmation: Option<bool>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            requires_confirmation: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            requires_confirmation: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Host-side implementation of a command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(
        &self,
        parameters: &HashMap<String, String>,
        context: &ContextInfo,
    ) -> anyhow::Result<ExecutionResult>;
}

/// Adapts a synchronous closure into a [`CommandHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&HashMap<String, String>, &ContextInfo) -> anyhow::Result<ExecutionResult> + Send + Sync,
{
    async fn execute(
        &self,
        parameters: &HashMap<String, String>,
        context: &ContextInfo,
    ) -> anyhow::Result<ExecutionResult> {
        (self.0)(parameters, context)
    }
}

/// Handlers keyed by handler id.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler_id` to a handler, replacing any previous binding.
    pub fn register(&self, handler_id: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let handler_id = handler_id.into();
        tracing::debug!(handler_id = %handler_id, "handler registered");
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handler_id, handler);
    }

    /// Bind a synchronous closure.
    pub fn register_fn<F>(&self, handler_id: impl Into<String>, f: F)
    where
        F: Fn(&HashMap<String, String>, &ContextInfo) -> anyhow::Result<ExecutionResult>
            + Send
            + Sync
            + 'static,
    {
        self.register(handler_id, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, handler_id: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(handler_id)
            .cloned()
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(handler_id)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<&String> = handlers.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &ids).finish()
    }
}

/// One entry of the dispatch history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command_id: String,
    pub raw_text: String,
    pub success: bool,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Executes commands one at a time so usage updates stay ordered.
#[derive(Debug)]
pub struct CommandDispatcher {
    handlers: Arc<HandlerRegistry>,
    usage: UsageStore,
    history: Mutex<VecDeque<HistoryEntry>>,
    max_history: usize,
    serial: tokio::sync::Mutex<()>,
}

impl CommandDispatcher {
    /// `max_history` of 0 disables the history. Usage is still recorded.
    pub fn new(handlers: Arc<HandlerRegistry>, usage: UsageStore, max_history: usize) -> Self {
        Self {
            handlers,
            usage,
            history: Mutex::new(VecDeque::with_capacity(max_history.min(256))),
            max_history,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn usage(&self) -> &UsageStore {
        &self.usage
    }

    /// Run the handler for `parsed`.
    ///
    /// Never fails: a missing handler, a missing required parameter, or a
    /// handler error all become a failed [`ExecutionResult`]. Every attempt
    /// is recorded in usage and history.
    pub async fn dispatch(&self, parsed: &ParsedCommand, context: &ContextInfo) -> ExecutionResult {
        let _turn = self.serial.lock().await;
        let command = &parsed.command;

        let result = if let Some(missing) = command
            .parameters
            .iter()
            .find(|spec| spec.required && !parsed.parameters.contains_key(&spec.name))
        {
            ExecutionResult::failure(format!(
                "'{}' needs a {}",
                command.name, missing.name
            ))
        } else {
            match self.handlers.get(&command.handler_id) {
                None => {
                    tracing::warn!(
                        command_id = %command.id,
                        handler_id = %command.handler_id,
                        "no handler registered"
                    );
                    ExecutionResult::failure(format!("'{}' is not available", command.name))
                }
                Some(handler) => match handler.execute(&parsed.parameters, context).await {
                    Ok(result) => result,
                    Err(e) => {
                        let err = VoiceCommandError::HandlerExecution {
                            command: command.name.clone(),
                            handler_id: command.handler_id.clone(),
                            message: format!("{e:#}"),
                        };
                        tracing::warn!(command_id = %command.id, error = %err, "handler failed");
                        ExecutionResult::failure(err.user_message())
                    }
                },
            }
        };

        self.record(parsed, &result);
        result
    }

    /// Record a command the user declined to confirm as a failed attempt.
    pub async fn record_denied(&self, parsed: &ParsedCommand, reason: Option<&str>) -> ExecutionResult {
        let _turn = self.serial.lock().await;
        let message = match reason {
            Some(reason) => format!("'{}' was not confirmed: {reason}", parsed.command.name),
            None => format!("'{}' was not confirmed", parsed.command.name),
        };
        let result = ExecutionResult {
            requires_confirmation: Some(true),
            ..ExecutionResult::failure(message)
        };
        self.record(parsed, &result);
        result
    }

    /// Dispatch history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn record(&self, parsed: &ParsedCommand, result: &ExecutionResult) {
        let command_id = &parsed.command.id;
        match self.usage.record(command_id, result.success) {
            Ok(record) => tracing::debug!(
                command_id = %command_id,
                count = record.invocation_count,
                success_rate = record.success_rate,
                "usage updated"
            ),
            Err(e) => tracing::warn!(command_id = %command_id, "cannot record usage: {e}"),
        }

        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        while history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(HistoryEntry {
            command_id: command_id.clone(),
            raw_text: parsed.raw_text.clone(),
            success: result.success,
            message: result.message.clone(),
            at: Utc::now(),
        });
    }
}
