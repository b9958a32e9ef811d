//! Confirmation plumbing for commands the safety gate wants confirmed.
//!
//! The interpreter asks an [`Approver`] before dispatching. Interactive
//! frontends use [`ChannelApprover`], which forwards a
//! [`CommandApprovalRequest`] over an mpsc channel and waits on a oneshot
//! for the user's answer. A responder that is dropped without answering
//! counts as a deny.

use crate::parser::ParsedCommand;
use crate::safety::RiskLevel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

/// The user's answer to a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny { reason: Option<String> },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: Some(reason.into()),
        }
    }
}

/// Resolves confirmation prompts.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(
        &self,
        parsed: &ParsedCommand,
        risk: RiskLevel,
        reason: &str,
    ) -> ApprovalDecision;
}

/// Answers every prompt the same way. Useful for headless hosts and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprover {
    approve: bool,
}

impl StaticApprover {
    pub fn approve_all() -> Self {
        Self { approve: true }
    }

    pub fn deny_all() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl Approver for StaticApprover {
    async fn request_approval(
        &self,
        _parsed: &ParsedCommand,
        _risk: RiskLevel,
        _reason: &str,
    ) -> ApprovalDecision {
        if self.approve {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::deny("confirmation is not available")
        }
    }
}

/// A pending confirmation for a UI to answer.
///
/// Call [`approve`](Self::approve) or [`deny`](Self::deny); dropping the
/// request without answering denies the command.
#[derive(Debug)]
pub struct CommandApprovalRequest {
    pub id: u64,
    pub command_id: String,
    pub command_name: String,
    pub raw_text: String,
    pub risk: RiskLevel,
    pub reason: String,
    respond_to: oneshot::Sender<ApprovalDecision>,
}

impl CommandApprovalRequest {
    /// Approve the command.
    ///
    /// Returns `true` if the answer reached the waiting interpreter.
    pub fn approve(self) -> bool {
        self.respond_to.send(ApprovalDecision::Approve).is_ok()
    }

    /// Deny the command, optionally saying why.
    pub fn deny(self, reason: Option<String>) -> bool {
        self.respond_to
            .send(ApprovalDecision::Deny { reason })
            .is_ok()
    }

    /// Human-readable prompt text.
    pub fn prompt(&self) -> String {
        format!(
            "Run '{}' ({} risk: {})? \"{}\"",
            self.command_name, self.risk, self.reason, self.raw_text
        )
    }
}

/// Forwards confirmation prompts to a UI over a channel.
#[derive(Debug)]
pub struct ChannelApprover {
    tx: mpsc::Sender<CommandApprovalRequest>,
    next_id: AtomicU64,
}

impl ChannelApprover {
    pub fn new(tx: mpsc::Sender<CommandApprovalRequest>) -> Self {
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create an approver together with the receiving end for the UI.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CommandApprovalRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Approver for ChannelApprover {
    async fn request_approval(
        &self,
        parsed: &ParsedCommand,
        risk: RiskLevel,
        reason: &str,
    ) -> ApprovalDecision {
        let (respond_to, response) = oneshot::channel();
        let request = CommandApprovalRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            command_id: parsed.command.id.clone(),
            command_name: parsed.command.name.clone(),
            raw_text: parsed.raw_text.clone(),
            risk,
            reason: reason.to_owned(),
            respond_to,
        };

        if self.tx.send(request).await.is_err() {
            tracing::warn!(command_id = %parsed.command.id, "approval channel closed, denying");
            return ApprovalDecision::deny("no one is available to confirm");
        }

        match response.await {
            Ok(decision) => decision,
            Err(_) => ApprovalDecision::deny("confirmation was cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::commands::{Command, CommandCategory};
    use crate::parser::MatchKind;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn parsed() -> ParsedCommand {
        ParsedCommand {
            command: Arc::new(
                Command::new("send_message", "Send Message", CommandCategory::Communication)
                    .sensitive(),
            ),
            parameters: HashMap::new(),
            confidence: 0.9,
            raw_text: "send message to bob".to_owned(),
            match_kind: MatchKind::Pattern,
            matched_template: Some("send message to {recipient}".to_owned()),
        }
    }

    #[tokio::test]
    async fn channel_approver_forwards_answer() {
        let (approver, mut rx) = ChannelApprover::channel(1);
        let ui = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.command_id, "send_message");
            assert!(request.prompt().contains("Send Message"));
            request.approve()
        });

        let decision = approver
            .request_approval(&parsed(), RiskLevel::High, "marked sensitive")
            .await;
        assert!(decision.is_approved());
        assert!(ui.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_request_denies() {
        let (approver, mut rx) = ChannelApprover::channel(1);
        let ui = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            drop(request);
        });

        let decision = approver
            .request_approval(&parsed(), RiskLevel::High, "marked sensitive")
            .await;
        assert!(!decision.is_approved());
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_denies() {
        let (approver, rx) = ChannelApprover::channel(1);
        drop(rx);
        let decision = approver
            .request_approval(&parsed(), RiskLevel::High, "marked sensitive")
            .await;
        assert!(matches!(decision, ApprovalDecision::Deny { reason: Some(_) }));
    }

    #[tokio::test]
    async fn static_approver() {
        let p = parsed();
        assert!(StaticApprover::approve_all()
            .request_approval(&p, RiskLevel::Low, "")
            .await
            .is_approved());
        assert!(!StaticApprover::deny_all()
            .request_approval(&p, RiskLevel::Low, "")
            .await
            .is_approved());
    }
}
