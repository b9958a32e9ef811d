//! End-to-end command interpretation: parse, gate, confirm, dispatch, record.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use voxcmd::approval::{ChannelApprover, StaticApprover};
use voxcmd::commands::CommandCategory;
use voxcmd::config::VoiceControlConfig;
use voxcmd::context::{ContextInfo, ContextTracker, ContextType, ManualContextTracker};
use voxcmd::dispatcher::{ExecutionResult, HandlerRegistry};
use voxcmd::handlers::{TaskBook, TaskStatus, register_navigation_handlers, register_task_handlers};
use voxcmd::safety::{RiskLevel, SafetyLevel};
use voxcmd::usage::JsonFileUsageBackend;
use voxcmd::usage::UsageBackend;
use voxcmd::{Approver, CommandInterpreter, CommandRegistry, VoiceCommandError};

struct Pipeline {
    interpreter: Arc<CommandInterpreter>,
    tracker: Arc<ManualContextTracker>,
    book: Arc<TaskBook>,
    sent: Arc<AtomicUsize>,
}

fn pipeline(
    config: &VoiceControlConfig,
    context: ContextType,
    approver: Arc<dyn Approver>,
) -> Pipeline {
    let registry = Arc::new(CommandRegistry::with_builtin());
    let tracker = Arc::new(ManualContextTracker::new(ContextInfo::manual(context)));
    let handlers = Arc::new(HandlerRegistry::new());
    let book = Arc::new(TaskBook::new());
    register_task_handlers(&handlers, Arc::clone(&book));
    register_navigation_handlers(&handlers, Arc::clone(&registry), Arc::clone(&tracker));

    let sent = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    handlers.register_fn("send_message", move |params, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::ok(format!(
            "Message to {} started",
            params.get("recipient").map_or("?", String::as_str)
        )))
    });
    handlers.register_fn("play_music", |_params, _ctx| Ok(ExecutionResult::ok("Playing.")));

    let interpreter =
        CommandInterpreter::from_config(config, registry, tracker.clone(), handlers, approver);
    Pipeline {
        interpreter: Arc::new(interpreter),
        tracker,
        book,
        sent,
    }
}

fn config_with(level: SafetyLevel) -> VoiceControlConfig {
    let mut config = VoiceControlConfig::default();
    config.safety.level = level;
    config
}

// ────────────────────────────────────────────────────────────────────────────
// Confirmation flow
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_strict_sensitive_waits_for_approval_before_dispatch() {
    let (approver, mut requests) = ChannelApprover::channel(1);
    let p = pipeline(
        &config_with(SafetyLevel::Strict),
        ContextType::Messaging,
        Arc::new(approver),
    );

    let interpreter = Arc::clone(&p.interpreter);
    let running = tokio::spawn(async move { interpreter.handle("send text to bob").await });

    let request = requests.recv().await.unwrap();
    assert_eq!(request.command_id, "send_message");
    assert_eq!(request.risk, RiskLevel::High);
    assert!(!request.reason.is_empty());
    assert_eq!(p.sent.load(Ordering::SeqCst), 0, "handler ran before approval");

    assert!(request.approve());
    let result = running.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(result.message, "Message to bob started");
    assert_eq!(p.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_denied_confirmation_is_recorded_as_failure() {
    let (approver, mut requests) = ChannelApprover::channel(1);
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::Messaging,
        Arc::new(approver),
    );

    let interpreter = Arc::clone(&p.interpreter);
    let running = tokio::spawn(async move { interpreter.handle("send text to bob").await });
    let request = requests.recv().await.unwrap();
    request.deny(Some("not now".to_owned()));

    let result = running.await.unwrap().unwrap();
    assert!(!result.success);
    assert!(result.message.contains("not now"));
    assert_eq!(p.sent.load(Ordering::SeqCst), 0);

    let record = p
        .interpreter
        .dispatcher()
        .usage()
        .get("send_message")
        .unwrap()
        .unwrap();
    assert_eq!(record.invocation_count, 1);
    assert!(record.success_rate.abs() < 1e-9);
}

#[tokio::test]
async fn test_permissive_runs_sensitive_without_asking() {
    let p = pipeline(
        &config_with(SafetyLevel::Permissive),
        ContextType::Messaging,
        Arc::new(StaticApprover::deny_all()),
    );
    let result = p.interpreter.handle("send message to alice").await.unwrap();
    assert!(result.success);
    assert_eq!(p.sent.load(Ordering::SeqCst), 1);
}

// ────────────────────────────────────────────────────────────────────────────
// Blocking
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_strict_blocks_destructive_with_reason() {
    let p = pipeline(
        &config_with(SafetyLevel::Strict),
        ContextType::TaskManagement,
        Arc::new(StaticApprover::approve_all()),
    );
    p.book.create("groceries", "medium", None);

    let err = p.interpreter.handle("delete task called groceries").await.unwrap_err();
    let VoiceCommandError::SafetyBlocked { command_id, risk, reason } = &err else {
        panic!("expected a block, got {err}");
    };
    assert_eq!(command_id, "delete_task");
    assert_eq!(*risk, RiskLevel::Critical);
    assert!(!reason.is_empty());
    assert!(err.user_message().starts_with("I can't do that"));
    // Still there.
    assert_eq!(p.book.list(None).len(), 1);
}

#[tokio::test]
async fn test_allow_listed_critical_command_is_confirmed_instead() {
    let mut config = config_with(SafetyLevel::Strict);
    config.safety.allowed_critical = vec!["delete_task".to_owned()];
    let p = pipeline(
        &config,
        ContextType::TaskManagement,
        Arc::new(StaticApprover::approve_all()),
    );
    p.book.create("groceries", "medium", None);

    let result = p.interpreter.handle("delete task called groceries").await.unwrap();
    assert!(result.success);
    assert!(p.book.list(None).is_empty());
}

#[tokio::test]
async fn test_disabled_category_is_blocked() {
    let mut config = config_with(SafetyLevel::Permissive);
    config.safety.enabled_categories = CommandCategory::all()
        .iter()
        .copied()
        .filter(|c| *c != CommandCategory::Media)
        .collect();
    let p = pipeline(
        &config,
        ContextType::Media,
        Arc::new(StaticApprover::approve_all()),
    );

    let err = p.interpreter.handle("play music").await.unwrap_err();
    assert!(matches!(err, VoiceCommandError::SafetyBlocked { .. }));
}

// ────────────────────────────────────────────────────────────────────────────
// Task scenario and usage
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_task_titles_are_single_tokens() {
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::TaskManagement,
        Arc::new(StaticApprover::deny_all()),
    );

    let result = p.interpreter.handle("create task buy groceries").await.unwrap();
    assert!(result.success);
    let result = p.interpreter.handle("create task called fix bike").await.unwrap();
    assert!(result.success);

    let mut titles: Vec<String> = p.book.list(None).into_iter().map(|t| t.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["fix", "groceries"]);
    assert!(p.book.list(None).iter().all(|t| t.priority == "medium"));
}

#[tokio::test]
async fn test_multi_word_noise_is_not_dispatched() {
    let p = pipeline(
        &config_with(SafetyLevel::Permissive),
        ContextType::General,
        Arc::new(StaticApprover::approve_all()),
    );
    for text in ["hello world", "blah blah blah", "flib flob flub flab"] {
        let err = p.interpreter.handle(text).await.unwrap_err();
        assert!(
            matches!(err, VoiceCommandError::ParseLowConfidence { .. }),
            "{text:?}: {err}"
        );
    }
    assert_eq!(p.sent.load(Ordering::SeqCst), 0);
    assert!(p.interpreter.dispatcher().history().is_empty());
}

#[tokio::test]
async fn test_success_then_failure_gives_half_success_rate() {
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::TaskManagement,
        Arc::new(StaticApprover::deny_all()),
    );
    p.book.create("groceries", "medium", None);

    assert!(p.interpreter.handle("complete task called groceries").await.unwrap().success);
    assert!(!p.interpreter.handle("complete task called ghost").await.unwrap().success);

    let record = p
        .interpreter
        .dispatcher()
        .usage()
        .get("complete_task")
        .unwrap()
        .unwrap();
    assert_eq!(record.invocation_count, 2);
    assert!((record.success_rate - 0.5).abs() < 1e-9);
    assert_eq!(p.book.list(Some(TaskStatus::Completed)).len(), 1);
}

#[tokio::test]
async fn test_switch_context_changes_what_parses() {
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::TaskManagement,
        Arc::new(StaticApprover::deny_all()),
    );

    let result = p.interpreter.handle("switch to media context").await.unwrap();
    assert!(result.success);
    assert_eq!(p.tracker.current_context().context_type, ContextType::Media);

    let result = p.interpreter.handle("play music").await.unwrap();
    assert_eq!(result.message, "Playing.");
}

#[tokio::test]
async fn test_unmatched_input_reports_low_confidence() {
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::General,
        Arc::new(StaticApprover::deny_all()),
    );
    let err = p.interpreter.handle("zxqvblorf").await.unwrap_err();
    match err {
        VoiceCommandError::ParseLowConfidence { text, best_score } => {
            assert_eq!(text, "zxqvblorf");
            assert!(best_score.is_none_or(|s| s < 0.1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(p.interpreter.dispatcher().history().is_empty());
}

#[tokio::test]
async fn test_suggestions_rank_after_enough_usage() {
    let p = pipeline(
        &config_with(SafetyLevel::Moderate),
        ContextType::TaskManagement,
        Arc::new(StaticApprover::deny_all()),
    );
    assert_eq!(
        p.interpreter.suggestions(4),
        vec!["help", "create_task", "list_tasks", "read_messages"]
    );

    for _ in 0..3 {
        p.interpreter.handle("list tasks").await.unwrap();
    }
    p.interpreter.handle("add task called laundry").await.unwrap();
    p.interpreter.handle("help").await.unwrap();
    p.interpreter.handle("help").await.unwrap();

    assert_eq!(
        p.interpreter.suggestions(3),
        vec!["list_tasks", "help", "create_task"]
    );
}

#[tokio::test]
async fn test_usage_persists_to_configured_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");
    let mut config = config_with(SafetyLevel::Moderate);
    config.commands.usage_path = Some(path.clone());

    {
        let p = pipeline(
            &config,
            ContextType::TaskManagement,
            Arc::new(StaticApprover::deny_all()),
        );
        p.interpreter.handle("list tasks").await.unwrap();
    }

    let backend = JsonFileUsageBackend::open(&path).unwrap();
    let record = backend.get("list_tasks").unwrap().unwrap();
    assert_eq!(record.invocation_count, 1);
}

#[tokio::test]
async fn test_history_is_bounded_by_config() {
    let mut config = config_with(SafetyLevel::Moderate);
    config.commands.max_command_history = 2;
    let p = pipeline(
        &config,
        ContextType::TaskManagement,
        Arc::new(StaticApprover::deny_all()),
    );
    for text in ["add task called a", "add task called b", "list tasks"] {
        p.interpreter.handle(text).await.unwrap();
    }
    let history = p.interpreter.dispatcher().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].raw_text, "add task called b");
    assert_eq!(history[1].command_id, "list_tasks");
}
