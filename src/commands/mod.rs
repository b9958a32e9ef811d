//! Command definitions and the registry that holds them.
//!
//! A [`Command`] describes one thing the user can ask for: the phrase
//! templates that trigger it, the parameters those templates capture, and
//! the handler id the dispatcher invokes. Templates are whitespace-separated
//! tokens where `{name}` is a placeholder that captures exactly one input
//! token into the parameter `name`.
//!
//! | Template | Input | Parameters |
//! |----------|-------|------------|
//! | `create task called {title}` | "create task called groceries" | `title = "groceries"` |
//! | `send message to {recipient}` | "send message to bob" | `recipient = "bob"` |

pub mod builtin;
pub mod registry;

pub use registry::CommandRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse grouping used for help output and safety gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Navigation,
    Tasks,
    Communication,
    Settings,
    Browsing,
    Development,
    Media,
    /// Commands that touch the host system itself (servers, disks, power).
    System,
    Help,
}

impl CommandCategory {
    /// Return all category variants.
    pub fn all() -> &'static [CommandCategory] {
        &[
            CommandCategory::Navigation,
            CommandCategory::Tasks,
            CommandCategory::Communication,
            CommandCategory::Settings,
            CommandCategory::Browsing,
            CommandCategory::Development,
            CommandCategory::Media,
            CommandCategory::System,
            CommandCategory::Help,
        ]
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandCategory::Navigation => "navigation",
            CommandCategory::Tasks => "tasks",
            CommandCategory::Communication => "communication",
            CommandCategory::Settings => "settings",
            CommandCategory::Browsing => "browsing",
            CommandCategory::Development => "development",
            CommandCategory::Media => "media",
            CommandCategory::System => "system",
            CommandCategory::Help => "help",
        };
        f.write_str(s)
    }
}

impl FromStr for CommandCategory {
    type Err = crate::error::VoiceCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandCategory::all()
            .iter()
            .copied()
            .find(|c| c.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::VoiceCommandError::Config(format!("unknown command category: {s:?}")))
    }
}

/// How a parameter value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Captured by a `{name}` placeholder.
    #[default]
    Text,
    /// Urgency (`high`, `medium`, `low`) extracted from urgency words.
    Priority,
    /// A time phrase such as "by tomorrow" or "in 3 days".
    TimeReference,
}

/// Declares one parameter a command accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Matches the `{name}` placeholder in templates.
    pub name: String,
    #[serde(default)]
    pub kind: ParameterKind,
    /// Dispatch fails without calling the handler when this is missing.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    /// A required placeholder parameter of kind [`ParameterKind::Text`].
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Text,
            required: true,
            description: description.into(),
        }
    }

    /// An optional parameter of any kind, with no description.
    ///
    /// Priority and time-reference parameters are filled from the raw text
    /// after matching, so they are normally declared this way.
    pub fn optional(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }
}

/// A registered command. Immutable once it is in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique within a registry scope.
    pub id: String,
    /// Display name. Its words double as fallback keywords.
    pub name: String,
    pub description: String,
    pub category: CommandCategory,
    /// Phrase templates, lowercase tokens with `{placeholder}` slots.
    pub patterns: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Key into the host's handler registry.
    pub handler_id: String,
    /// Raises the risk level to at least high.
    #[serde(default)]
    pub sensitive: bool,
    /// Always ask before running, whatever the safety level.
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Example phrases shown in help output.
    #[serde(default)]
    pub examples: Vec<String>,
}

impl Command {
    /// Create a command whose handler id equals its id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: CommandCategory) -> Self {
        let id = id.into();
        Self {
            handler_id: id.clone(),
            id,
            name: name.into(),
            description: String::new(),
            category,
            patterns: Vec::new(),
            parameters: Vec::new(),
            sensitive: false,
            requires_confirmation: false,
            examples: Vec::new(),
        }
    }

    // Builders. Each consumes and returns `self`.

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a phrase template. Templates are tried in insertion order and
    /// the best score wins.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Add an example phrase. Examples should parse back to this command.
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Bind to a handler id other than the command id.
    pub fn with_handler(mut self, handler_id: impl Into<String>) -> Self {
        self.handler_id = handler_id.into();
        self
    }

    /// Mark as sensitive (messages, settings resets and the like).
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Require a confirmation before every run.
    pub fn confirm_first(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// Lowercase words of the display name, used for keyword fallback.
    pub fn keywords(&self) -> Vec<String> {
        self.name
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Return whether a template token is a `{placeholder}`, yielding its name.
pub(crate) fn placeholder_name(token: &str) -> Option<&str> {
    token
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}
