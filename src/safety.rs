//! Risk classification and the proceed / confirm / block decision.
//!
//! Decisions are a pure function of the command definition and the active
//! [`SafetyConfig`]; nothing here performs I/O.
//!
//! | Level | Critical (destructive) | Sensitive / system | Everything else |
//! |-------|------------------------|--------------------|-----------------|
//! | strict | block (confirm if allow-listed) | confirm | proceed |
//! | moderate | confirm if sensitive | confirm if sensitive | proceed |
//! | permissive | confirm | proceed | proceed |

use crate::commands::{Command, CommandCategory};
use crate::config::SafetyConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Words that mark a command as destructive.
pub const CRITICAL_KEYWORDS: &[&str] = &[
    "delete", "remove", "format", "shutdown", "erase", "wipe", "destroy", "purge", "reset",
    "uninstall", "kill",
];

/// How aggressively commands are gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Strict,
    #[default]
    Moderate,
    Permissive,
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyLevel::Strict => "strict",
            SafetyLevel::Moderate => "moderate",
            SafetyLevel::Permissive => "permissive",
        };
        f.write_str(s)
    }
}

impl FromStr for SafetyLevel {
    type Err = crate::error::VoiceCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SafetyLevel::Strict),
            "moderate" => Ok(SafetyLevel::Moderate),
            "permissive" => Ok(SafetyLevel::Permissive),
            other => Err(crate::error::VoiceCommandError::Config(format!(
                "unknown safety level: {other:?}"
            ))),
        }
    }
}

/// Coarse risk classification of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// What the gate wants done with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyOutcome {
    Proceed,
    Confirm,
    Block,
}

/// Gate decision with the reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub outcome: SafetyOutcome,
    pub risk: RiskLevel,
    pub reason: String,
}

impl SafetyDecision {
    fn new(outcome: SafetyOutcome, risk: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            risk,
            reason: reason.into(),
        }
    }
}

/// Whether the command's id, name, or template literals contain a
/// destructive keyword.
pub fn is_destructive(command: &Command) -> bool {
    let id_words = command.id.split(['_', '-', '.']);
    let name_words = command.name.split_whitespace();
    let pattern_words = command.patterns.iter().flat_map(|p| p.split_whitespace());
    id_words
        .chain(name_words)
        .chain(pattern_words)
        .any(|w| CRITICAL_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)))
}

/// Classify a command's risk independent of the safety level.
pub fn classify_risk(command: &Command) -> RiskLevel {
    if is_destructive(command) {
        RiskLevel::Critical
    } else if command.sensitive {
        RiskLevel::High
    } else if command.category == CommandCategory::System || command.requires_confirmation {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Decides whether a parsed command may run.
#[derive(Debug, Clone, Default)]
pub struct SafetyGate {
    config: SafetyConfig,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Replace the safety settings.
    pub fn update_config(&mut self, config: SafetyConfig) {
        self.config = config;
    }

    /// Evaluate a command against the current settings.
    pub fn evaluate(&self, command: &Command) -> SafetyDecision {
        let risk = classify_risk(command);

        if !self.config.enabled_categories.contains(&command.category) {
            return SafetyDecision::new(
                SafetyOutcome::Block,
                risk,
                format!("{} commands are turned off", command.category),
            );
        }

        let decision = match self.config.level {
            SafetyLevel::Strict => self.strict(command, risk),
            SafetyLevel::Moderate => {
                if command.sensitive {
                    SafetyDecision::new(
                        SafetyOutcome::Confirm,
                        risk,
                        format!("'{}' is marked sensitive", command.name),
                    )
                } else if command.requires_confirmation {
                    SafetyDecision::new(
                        SafetyOutcome::Confirm,
                        risk,
                        format!("'{}' always asks before running", command.name),
                    )
                } else {
                    SafetyDecision::new(SafetyOutcome::Proceed, risk, "allowed")
                }
            }
            SafetyLevel::Permissive => {
                if risk == RiskLevel::Critical {
                    SafetyDecision::new(
                        SafetyOutcome::Confirm,
                        risk,
                        format!("'{}' is destructive", command.name),
                    )
                } else {
                    SafetyDecision::new(SafetyOutcome::Proceed, risk, "allowed")
                }
            }
        };

        if decision.outcome == SafetyOutcome::Proceed && !self.config.auto_execute_safe_commands {
            return SafetyDecision::new(
                SafetyOutcome::Confirm,
                risk,
                "automatic execution is turned off",
            );
        }
        decision
    }

    fn strict(&self, command: &Command, risk: RiskLevel) -> SafetyDecision {
        if risk == RiskLevel::Critical {
            if self.config.allowed_critical.iter().any(|id| id == &command.id) {
                return SafetyDecision::new(
                    SafetyOutcome::Confirm,
                    risk,
                    format!("'{}' is destructive but explicitly allowed", command.name),
                );
            }
            return SafetyDecision::new(
                SafetyOutcome::Block,
                risk,
                format!("'{}' is destructive and strict mode blocks it", command.name),
            );
        }
        if command.sensitive {
            return SafetyDecision::new(
                SafetyOutcome::Confirm,
                risk,
                format!("'{}' is marked sensitive", command.name),
            );
        }
        if command.category == CommandCategory::System {
            return SafetyDecision::new(
                SafetyOutcome::Confirm,
                risk,
                format!("'{}' changes the system", command.name),
            );
        }
        if command.requires_confirmation {
            return SafetyDecision::new(
                SafetyOutcome::Confirm,
                risk,
                format!("'{}' always asks before running", command.name),
            );
        }
        SafetyDecision::new(SafetyOutcome::Proceed, risk, "allowed")
    }
}
