//! Handlers for the built-in commands the console host can actually run:
//! navigation (help, context switching, cancel) and an in-memory task book.

use crate::commands::CommandRegistry;
use crate::context::{ContextInfo, ContextType, ManualContextTracker};
use crate::dispatcher::{ExecutionResult, HandlerRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// One entry in the [`TaskBook`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    /// `high`, `medium`, or `low`.
    pub priority: String,
    pub due: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

fn priority_rank(priority: &str) -> u8 {
    match priority {
        "high" => 0,
        "low" => 2,
        _ => 1,
    }
}

/// Tasks kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct TaskBook {
    tasks: Mutex<Vec<Task>>,
}

impl TaskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending task and return a copy of it. Titles need not be
    /// unique.
    pub fn create(&self, title: &str, priority: &str, due: Option<String>) -> Task {
        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_owned(),
            priority: priority.to_owned(),
            due,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        tracing::info!(task_id = %task.id, title = %task.title, "task created");
        self.lock().push(task.clone());
        task
    }

    /// Mark the task matching `identifier` (id or title) completed.
    pub fn complete(&self, identifier: &str) -> Option<Task> {
        let mut tasks = self.lock();
        let idx = find_index(&tasks, identifier)?;
        tasks[idx].status = TaskStatus::Completed;
        tracing::info!(task_id = %tasks[idx].id, "task completed");
        Some(tasks[idx].clone())
    }

    /// Remove the task matching `identifier` (id or title) and return it.
    /// Returns `None` when nothing matches.
    pub fn delete(&self, identifier: &str) -> Option<Task> {
        let mut tasks = self.lock();
        let idx = find_index(&tasks, identifier)?;
        let task = tasks.remove(idx);
        tracing::info!(task_id = %task.id, "task deleted");
        Some(task)
    }

    /// Tasks ordered by priority, then creation time.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .lock()
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            priority_rank(&a.priority)
                .cmp(&priority_rank(&b.priority))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        tasks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exact id first, then case-insensitive title, then title substring.
fn find_index(tasks: &[Task], identifier: &str) -> Option<usize> {
    let needle = identifier.to_lowercase();
    tasks
        .iter()
        .position(|t| t.id.to_string() == identifier)
        .or_else(|| tasks.iter().position(|t| t.title.to_lowercase() == needle))
        .or_else(|| tasks.iter().position(|t| t.title.to_lowercase().contains(&needle)))
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

/// Bind `create_task`, `complete_task`, `list_tasks`, and `delete_task`.
pub fn register_task_handlers(handlers: &HandlerRegistry, book: Arc<TaskBook>) {
    let b = Arc::clone(&book);
    handlers.register_fn("create_task", move |params, _ctx| {
        let title = param(params, "title").unwrap_or("untitled");
        let priority = param(params, "priority").unwrap_or("medium");
        let due = param(params, "due").map(str::to_owned);
        let task = b.create(title, priority, due);
        let message = match &task.due {
            Some(due) => format!("Task created: {} ({} priority, {due})", task.title, task.priority),
            None => format!("Task created: {} ({} priority)", task.title, task.priority),
        };
        Ok(ExecutionResult::ok(message).with_data(serde_json::to_value(&task)?))
    });

    let b = Arc::clone(&book);
    handlers.register_fn("complete_task", move |params, _ctx| {
        let title = param(params, "title").unwrap_or_default();
        Ok(match b.complete(title) {
            Some(task) => ExecutionResult::ok(format!("Marked as completed: {}", task.title)),
            None => ExecutionResult::failure(format!("Task not found: {title}")),
        })
    });

    let b = Arc::clone(&book);
    handlers.register_fn("list_tasks", move |_params, _ctx| {
        let tasks = b.list(None);
        if tasks.is_empty() {
            return Ok(ExecutionResult::ok("No tasks found."));
        }
        let mut lines = vec![format!("You have {} tasks:", tasks.len())];
        for task in &tasks {
            let mark = match task.status {
                TaskStatus::Completed => "[x]",
                TaskStatus::Pending => "[ ]",
            };
            lines.push(format!("{mark} {} ({} priority)", task.title, task.priority));
        }
        Ok(ExecutionResult::ok(lines.join("\n")).with_data(serde_json::to_value(&tasks)?))
    });

    handlers.register_fn("delete_task", move |params, _ctx| {
        let title = param(params, "title").unwrap_or_default();
        Ok(match book.delete(title) {
            Some(task) => ExecutionResult::ok(format!("Deleted task: {}", task.title)),
            None => ExecutionResult::failure(format!("Task not found: {title}")),
        })
    });
}

/// Bind `help`, `switch_context`, and `cancel`.
pub fn register_navigation_handlers(
    handlers: &HandlerRegistry,
    registry: Arc<CommandRegistry>,
    tracker: Arc<ManualContextTracker>,
) {
    handlers.register_fn("help", move |_params, ctx: &ContextInfo| {
        let lines = registry.help_lines(ctx.scope());
        Ok(ExecutionResult::ok(format!(
            "In {} you can say:\n{}",
            ctx.context_type,
            lines.join("\n")
        )))
    });

    handlers.register_fn("switch_context", move |params, _ctx| {
        let Some(raw) = param(params, "context") else {
            return Ok(ExecutionResult::failure("Which context?"));
        };
        match raw.parse::<ContextType>() {
            Ok(context) => {
                tracker.set_context(ContextInfo::manual(context));
                Ok(ExecutionResult::ok(format!("Switched to {context}.")))
            }
            Err(e) => Ok(ExecutionResult::failure(e.to_string())),
        }
    });

    handlers.register_fn("cancel", |_params, _ctx| Ok(ExecutionResult::ok("Cancelled.")));
}
