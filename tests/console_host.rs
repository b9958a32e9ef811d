//! Drives the line console with scripted input.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use voxcmd::config::VoiceControlConfig;
use voxcmd::context::ContextType;
use voxcmd::session::SessionEvent;
use voxcmd::{Console, SessionState};

async fn run_script(script: &str) -> (Console, String) {
    let mut console = Console::new(&VoiceControlConfig::default(), ContextType::General);
    let mut out = Vec::new();
    console.run(script.as_bytes(), &mut out).await.unwrap();
    (console, String::from_utf8(out).unwrap())
}

#[tokio::test]
async fn test_task_session_with_confirmation_prompts() {
    let script = "\
:context tasks
create task called groceries
create task called laundry
show my tasks
delete task called groceries
y
delete task called laundry
n
:history
:quit
create task called never
";
    let (console, out) = run_script(script).await;

    assert!(out.starts_with("voxcmd ready."));
    assert!(out.contains("context: task_management"));
    assert!(out.contains("Task created: groceries (medium priority)"));
    assert!(out.contains("You have 2 tasks:"));
    assert_eq!(out.matches("[y/N]").count(), 2);
    assert!(out.contains("Run 'Delete Task' (critical risk"));
    assert!(out.contains("Deleted task: groceries"));
    assert!(out.contains("'Delete Task' was not confirmed: declined at the prompt"));
    assert!(out.contains("delete task called laundry (failed)"));
    assert!(!out.contains("never"));

    let history = console.interpreter().dispatcher().history();
    assert_eq!(history.len(), 5);
    assert_eq!(console.session().state(), SessionState::Disabled);
}

#[tokio::test]
async fn test_unknown_input_gets_a_hint() {
    let (_console, out) = run_script("zxqv\n").await;
    assert!(out.contains("Sorry, I didn't understand that. Say 'help'"));
}

#[tokio::test]
async fn test_meta_commands() {
    let script = "\
:status
:suggest
:context
:context nowhere
:frobnicate
";
    let (_console, out) = run_script(script).await;
    assert!(out.contains("session: connected (reconnect attempts: 0)"));
    assert!(out.contains("try: help, create_task, list_tasks, read_messages"));
    assert!(out.contains("context: general"));
    assert!(out.contains("unknown context type: \"nowhere\""));
    assert!(out.contains("unknown console command ':frobnicate'"));
}

#[tokio::test(start_paused = true)]
async fn test_idle_prompt_does_not_trip_the_health_check() {
    let mut config = VoiceControlConfig::default();
    config.session.session_timeout_ms = 1_000;
    config.session.health_check_interval_ms = 200;
    let mut console = Console::new(&config, ContextType::General);
    let mut events = console.session().subscribe();

    let (mut writer, reader) = tokio::io::duplex(64);
    let typist = tokio::spawn(async move {
        // Ten timeouts' worth of silence before the user types anything.
        tokio::time::sleep(Duration::from_secs(10)).await;
        writer.write_all(b"list tasks\n:status\n:quit\n").await.unwrap();
    });

    let mut out = Vec::new();
    console
        .run(tokio::io::BufReader::new(reader), &mut out)
        .await
        .unwrap();
    typist.await.unwrap();

    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("session: connected (reconnect attempts: 0)"));
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                SessionEvent::Error { .. } | SessionEvent::ReconnectScheduled { .. }
            ),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test]
async fn test_corrupt_usage_file_does_not_stop_the_console() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");
    std::fs::write(&path, "{not json").unwrap();
    let mut config = VoiceControlConfig::default();
    config.commands.usage_path = Some(path.clone());

    let mut console = Console::new(&config, ContextType::TaskManagement);
    let mut out = Vec::new();
    console
        .run("create task called groceries\n:quit\n".as_bytes(), &mut out)
        .await
        .unwrap();

    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Task created: groceries"));
    let record = console
        .interpreter()
        .dispatcher()
        .usage()
        .get("create_task")
        .unwrap()
        .unwrap();
    assert_eq!(record.invocation_count, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
}
