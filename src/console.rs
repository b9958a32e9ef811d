//! Line-oriented console host.
//!
//! Each input line is treated as a transcript: it is published through the
//! voice session, interpreted, and the reply is spoken back. Confirmation
//! prompts are answered on the next input line. Lines starting with `:`
//! are console meta-commands.
//!
//! Output is plain text on the given writer; diagnostics go through
//! `tracing` (stderr).

use crate::approval::{ChannelApprover, CommandApprovalRequest};
use crate::commands::CommandRegistry;
use crate::config::VoiceControlConfig;
use crate::context::{ContextInfo, ContextTracker, ContextType, ManualContextTracker};
use crate::dispatcher::HandlerRegistry;
use crate::error::{Result, VoiceCommandError};
use crate::handlers::{TaskBook, register_navigation_handlers, register_task_handlers};
use crate::interpreter::{CommandInterpreter, unknown_command_hint};
use crate::session::{
    LoopbackTransport, SessionEvent, SessionManager, SessionState, SilentSynthesizer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

const APPROVAL_CAPACITY: usize = 4;
const SUGGESTION_LIMIT: usize = 5;
const MIN_KEEPALIVE: Duration = Duration::from_millis(10);

/// Everything the console needs, wired together.
pub struct Console {
    interpreter: CommandInterpreter,
    session: SessionManager,
    tracker: Arc<ManualContextTracker>,
    approvals: mpsc::Receiver<CommandApprovalRequest>,
}

impl Console {
    /// Build the console from configuration with the built-in commands,
    /// demo task handlers, and a loopback voice session.
    pub fn new(config: &VoiceControlConfig, context: ContextType) -> Self {
        let registry = Arc::new(CommandRegistry::with_builtin());
        let tracker = Arc::new(ManualContextTracker::new(ContextInfo::manual(context)));

        let handlers = Arc::new(HandlerRegistry::new());
        register_task_handlers(&handlers, Arc::new(TaskBook::new()));
        register_navigation_handlers(&handlers, Arc::clone(&registry), Arc::clone(&tracker));

        let (approver, approvals) = ChannelApprover::channel(APPROVAL_CAPACITY);
        let interpreter = CommandInterpreter::from_config(
            config,
            registry,
            tracker.clone(),
            handlers,
            Arc::new(approver),
        );

        let session = SessionManager::new(
            config.session.clone(),
            Arc::new(LoopbackTransport::default()),
            Arc::new(SilentSynthesizer),
        );

        Self {
            interpreter,
            session,
            tracker,
            approvals,
        }
    }

    /// The loopback voice session the console drives.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// The interpreter handling each input line.
    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// Run until `:quit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if !self.session.snapshot().enabled {
            if let Err(e) = self.session.enable().await {
                tracing::warn!("voice session unavailable: {e}");
            }
        }
        let forwarder = spawn_event_logger(self.session.subscribe());

        let mut lines = input.lines();
        write_line(&mut output, "voxcmd ready. Type a command, ':help', or ':quit'.").await?;

        while let Some(line) = next_line_keeping_alive(&self.session, &mut lines).await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(meta) = line.strip_prefix(':') {
                if !self.meta_command(meta, &mut output).await? {
                    break;
                }
                continue;
            }

            self.publish_transcript(line);
            let reply = self.interpret(line, &mut lines, &mut output).await?;
            write_line(&mut output, &reply).await?;
            self.speak(&reply).await;
        }

        forwarder.abort();
        if let Err(e) = self.session.disable().await {
            tracing::warn!("failed to shut down voice session: {e}");
        }
        output.flush().await?;
        Ok(())
    }

    /// Interpret one line, answering confirmation prompts from `lines`.
    async fn interpret<R, W>(
        &mut self,
        text: &str,
        lines: &mut Lines<R>,
        output: &mut W,
    ) -> Result<String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let _ = self.session.set_processing(true);
        let handling = self.interpreter.handle(text);
        tokio::pin!(handling);

        let outcome = loop {
            tokio::select! {
                outcome = &mut handling => break outcome,
                Some(request) = self.approvals.recv() => {
                    write_line(output, &format!("{} [y/N]", request.prompt())).await?;
                    let answer = next_line_keeping_alive(&self.session, lines)
                        .await?
                        .unwrap_or_default();
                    if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                        request.approve();
                    } else {
                        request.deny(Some("declined at the prompt".to_owned()));
                    }
                }
            }
        };
        let _ = self.session.set_processing(false);

        Ok(match outcome {
            Ok(result) => result.message,
            Err(e @ VoiceCommandError::ParseLowConfidence { .. }) => {
                format!("{} {}", e.user_message(), unknown_command_hint(text))
            }
            Err(e) => e.user_message(),
        })
    }

    /// Returns `false` when the console should exit.
    async fn meta_command<W>(&self, meta: &str, output: &mut W) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let mut parts = meta.split_whitespace();
        match parts.next().unwrap_or_default() {
            "quit" | "q" | "exit" => return Ok(false),
            "context" => match parts.next() {
                Some(raw) => match raw.parse::<ContextType>() {
                    Ok(context) => {
                        self.tracker.set_context(ContextInfo::manual(context));
                        write_line(output, &format!("context: {context}")).await?;
                    }
                    Err(e) => write_line(output, &e.to_string()).await?,
                },
                None => {
                    let current = self.tracker.current_context();
                    write_line(output, &format!("context: {}", current.context_type)).await?;
                }
            },
            "suggest" => {
                let ids = self.interpreter.suggestions(SUGGESTION_LIMIT);
                write_line(output, &format!("try: {}", ids.join(", "))).await?;
            }
            "help" => {
                for line in self.interpreter.help_lines() {
                    write_line(output, &line).await?;
                }
            }
            "history" => {
                let history = self.interpreter.dispatcher().history();
                if history.is_empty() {
                    write_line(output, "no commands yet").await?;
                }
                for entry in history {
                    let mark = if entry.success { "ok" } else { "failed" };
                    write_line(
                        output,
                        &format!("{} {} ({mark}): {}", entry.at.format("%H:%M:%S"), entry.raw_text, entry.message),
                    )
                    .await?;
                }
            }
            "status" => {
                let session = self.session.snapshot();
                write_line(
                    output,
                    &format!(
                        "session: {} (reconnect attempts: {})",
                        session.state(),
                        session.reconnect_attempts
                    ),
                )
                .await?;
            }
            other => {
                write_line(
                    output,
                    &format!("unknown console command ':{other}' (try :help, :context, :suggest, :history, :status, :quit)"),
                )
                .await?;
            }
        }
        Ok(true)
    }

    fn publish_transcript(&self, text: &str) {
        if self.session.state() == SessionState::Connected {
            let _ = self.session.start_listening();
        }
        if let Err(e) = self.session.submit_transcript(text) {
            tracing::debug!("transcript not published: {e}");
        }
    }

    async fn speak(&self, reply: &str) {
        match self.session.speak(reply).await {
            Ok(audio) => tracing::debug!(samples = audio.samples.len(), "reply synthesized"),
            Err(e) => tracing::debug!("reply not spoken: {e}"),
        }
    }
}

/// Wait for the next input line. A user thinking at the prompt counts as
/// activity, so the idle timeout never fires while the console waits.
async fn next_line_keeping_alive<R>(
    session: &SessionManager,
    lines: &mut Lines<R>,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let period = (session.config().session_timeout() / 2).max(MIN_KEEPALIVE);
    let mut keepalive = tokio::time::interval(period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            line = lines.next_line() => return Ok(line?),
            _ = keepalive.tick() => session.record_activity(),
        }
    }
}

fn spawn_event_logger(mut events: broadcast::Receiver<SessionEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "session event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "session event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
