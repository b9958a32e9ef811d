//! Operating context that narrows which commands are eligible.
//!
//! The host application decides what the user is currently doing (the
//! focused view, an explicit mode switch, a guess from recent input) and
//! publishes it through a [`ContextTracker`]. The parser only reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Operating domain the user is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    /// No particular domain; every context's commands are eligible.
    General,
    TaskManagement,
    Messaging,
    Settings,
    Browsing,
    Development,
    Media,
}

impl ContextType {
    /// Return every context variant, `General` first.
    pub fn all() -> &'static [ContextType] {
        &[
            ContextType::General,
            ContextType::TaskManagement,
            ContextType::Messaging,
            ContextType::Settings,
            ContextType::Browsing,
            ContextType::Development,
            ContextType::Media,
        ]
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextType::General => "general",
            ContextType::TaskManagement => "task_management",
            ContextType::Messaging => "messaging",
            ContextType::Settings => "settings",
            ContextType::Browsing => "browsing",
            ContextType::Development => "development",
            ContextType::Media => "media",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an unknown context name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown context type: {0:?}")]
pub struct ContextParseError(pub String);

impl FromStr for ContextType {
    type Err = ContextParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "general" => Ok(ContextType::General),
            "task_management" | "tasks" | "task" => Ok(ContextType::TaskManagement),
            "messaging" | "messages" | "chat" => Ok(ContextType::Messaging),
            "settings" => Ok(ContextType::Settings),
            "browsing" | "browser" | "web" => Ok(ContextType::Browsing),
            "development" | "dev" => Ok(ContextType::Development),
            "media" => Ok(ContextType::Media),
            _ => Err(ContextParseError(s.to_owned())),
        }
    }
}

/// How the active context was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// The user picked the context explicitly.
    Manual,
    /// Derived from the view or window that has focus.
    ActiveView,
    /// Guessed from recent activity.
    Inferred,
    /// Nothing known; the fallback context.
    Default,
}

/// Snapshot of the currently active context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub context_type: ContextType,
    /// Detection confidence, clamped to `[0, 1]`.
    pub confidence: f32,
    pub source: ContextSource,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ContextInfo {
    /// Stamped with the current time. `confidence` is clamped to `[0, 1]`.
    pub fn new(context_type: ContextType, confidence: f32, source: ContextSource) -> Self {
        Self {
            context_type,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Explicitly chosen context with full confidence.
    pub fn manual(context_type: ContextType) -> Self {
        Self::new(context_type, 1.0, ContextSource::Manual)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Context used to scope command lookup. `General` means no narrowing.
    pub fn scope(&self) -> Option<ContextType> {
        match self.context_type {
            ContextType::General => None,
            other => Some(other),
        }
    }
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self::new(ContextType::General, 0.0, ContextSource::Default)
    }
}

/// Supplies the active context. Implemented by the host application.
pub trait ContextTracker: Send + Sync {
    fn current_context(&self) -> ContextInfo;
}

/// Tracker whose context is set explicitly by the host.
#[derive(Debug, Default)]
pub struct ManualContextTracker {
    current: Mutex<ContextInfo>,
}

impl ManualContextTracker {
    pub fn new(initial: ContextInfo) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    /// Replace the active context.
    pub fn set_context(&self, info: ContextInfo) {
        tracing::debug!(context = %info.context_type, source = ?info.source, "context changed");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = info;
    }
}

impl ContextTracker for ManualContextTracker {
    fn current_context(&self) -> ContextInfo {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("tasks".parse::<ContextType>().unwrap(), ContextType::TaskManagement);
        assert_eq!("Task-Management".parse::<ContextType>().unwrap(), ContextType::TaskManagement);
        assert_eq!("web".parse::<ContextType>().unwrap(), ContextType::Browsing);
        assert!("kitchen".parse::<ContextType>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for ctx in ContextType::all() {
            assert_eq!(ctx.to_string().parse::<ContextType>().unwrap(), *ctx);
        }
    }

    #[test]
    fn confidence_is_clamped() {
        let info = ContextInfo::new(ContextType::Media, 1.7, ContextSource::Inferred);
        assert!((info.confidence - 1.0).abs() < f32::EPSILON);
        let info = ContextInfo::new(ContextType::Media, -0.3, ContextSource::Inferred);
        assert!(info.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn general_context_has_no_scope() {
        assert_eq!(ContextInfo::default().scope(), None);
        assert_eq!(
            ContextInfo::manual(ContextType::Messaging).scope(),
            Some(ContextType::Messaging)
        );
    }

    #[test]
    fn manual_tracker_reports_latest_context() {
        let tracker = ManualContextTracker::default();
        assert_eq!(tracker.current_context().context_type, ContextType::General);
        tracker.set_context(
            ContextInfo::manual(ContextType::Development).with_metadata("view", "editor"),
        );
        let current = tracker.current_context();
        assert_eq!(current.context_type, ContextType::Development);
        assert_eq!(current.metadata.get("view").map(String::as_str), Some("editor"));
    }
}
