//! Global and per-context command sets.

use super::{Command, CommandCategory};
use crate::context::ContextType;
use crate::error::{Result, VoiceCommandError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// Merged, ordered view of the commands eligible in one scope.
pub type CommandSet = Arc<Vec<Arc<Command>>>;

#[derive(Debug, Default)]
struct Sets {
    global: Vec<Arc<Command>>,
    /// Ordered so "all contexts" iteration is deterministic.
    by_context: BTreeMap<ContextType, Vec<Arc<Command>>>,
}

/// Holds global commands plus one command set per context.
///
/// Lookups are cached per scope (`None` = every context) and the affected
/// cache entries are dropped whenever a command is added or removed.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    sets: RwLock<Sets>,
    cache: Mutex<HashMap<Option<ContextType>, CommandSet>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the built-in command set.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        for (scope, command) in super::builtin::builtin_commands() {
            if let Err(e) = registry.add_command(command, scope) {
                tracing::warn!("skipping builtin command: {e}");
            }
        }
        registry
    }

    /// Commands eligible in `context`: globals first, then the context's own
    /// set. With `None`, every context's set follows the globals.
    pub fn get_commands(&self, context: Option<ContextType>) -> CommandSet {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&context) {
            return Arc::clone(hit);
        }

        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        let mut merged: Vec<Arc<Command>> = sets.global.clone();
        match context {
            Some(ctx) => {
                if let Some(scoped) = sets.by_context.get(&ctx) {
                    merged.extend(scoped.iter().cloned());
                }
            }
            None => {
                for scoped in sets.by_context.values() {
                    merged.extend(scoped.iter().cloned());
                }
            }
        }

        let merged = Arc::new(merged);
        cache.insert(context, Arc::clone(&merged));
        merged
    }

    /// Register a command globally (`None`) or for one context.
    ///
    /// # Errors
    ///
    /// Fails if a command with the same id already exists in that scope.
    pub fn add_command(&self, command: Command, context: Option<ContextType>) -> Result<()> {
        {
            let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
            let target = match context {
                Some(ctx) => sets.by_context.entry(ctx).or_default(),
                None => &mut sets.global,
            };
            if target.iter().any(|c| c.id == command.id) {
                return Err(VoiceCommandError::Registry(format!(
                    "command {} is already registered in {}",
                    command.id,
                    scope_label(context)
                )));
            }
            tracing::debug!(command_id = %command.id, scope = %scope_label(context), "command registered");
            target.push(Arc::new(command));
        }
        self.invalidate(context);
        Ok(())
    }

    /// Remove a command by id from the global set (`None`) or one context.
    ///
    /// Returns the removed command.
    ///
    /// # Errors
    ///
    /// Fails if no command with that id exists in the scope.
    pub fn remove_command(&self, id: &str, context: Option<ContextType>) -> Result<Arc<Command>> {
        let removed = {
            let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
            let target = match context {
                Some(ctx) => sets.by_context.get_mut(&ctx),
                None => Some(&mut sets.global),
            };
            let position = target
                .as_ref()
                .and_then(|set| set.iter().position(|c| c.id == id));
            match (target, position) {
                (Some(set), Some(idx)) => set.remove(idx),
                _ => {
                    return Err(VoiceCommandError::Registry(format!(
                        "command {id} is not registered in {}",
                        scope_label(context)
                    )));
                }
            }
        };
        tracing::debug!(command_id = %id, scope = %scope_label(context), "command removed");
        self.invalidate(context);
        Ok(removed)
    }

    /// Find a command by id in any scope.
    pub fn find(&self, id: &str) -> Option<Arc<Command>> {
        self.get_commands(None).iter().find(|c| c.id == id).cloned()
    }

    /// Total number of registered commands across all scopes.
    pub fn len(&self) -> usize {
        self.get_commands(None).len()
    }

    /// Whether no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Help text grouped by category, one line per command with its first
    /// example phrase.
    pub fn help_lines(&self, context: Option<ContextType>) -> Vec<String> {
        let commands = self.get_commands(context);
        let mut lines = Vec::new();
        for category in CommandCategory::all() {
            let in_category: Vec<&Arc<Command>> =
                commands.iter().filter(|c| c.category == *category).collect();
            if in_category.is_empty() {
                continue;
            }
            lines.push(format!("{category}:"));
            for command in in_category {
                match command.examples.first() {
                    Some(example) => lines.push(format!("  '{example}' - {}", command.name)),
                    None => lines.push(format!("  {}", command.name)),
                }
            }
        }
        lines
    }

    fn invalidate(&self, context: Option<ContextType>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match context {
            // Globals are part of every merged view.
            None => cache.clear(),
            Some(ctx) => {
                cache.remove(&Some(ctx));
                cache.remove(&None);
            }
        }
    }
}

fn scope_label(context: Option<ContextType>) -> String {
    context.map_or_else(|| "global scope".to_owned(), |c| format!("context {c}"))
}
