//! Seed command set registered at startup.
//!
//! Each entry lists its scope (`None` = global). The example phrases double
//! as a regression corpus: every example must parse back to its own command.
//!
//! Every template with a placeholder carries at least three literal words.
//! A placeholder earns 0.8 for any token, so with fewer anchors unrelated
//! multi-word input clears the match threshold.

use super::{Command, CommandCategory, ParameterKind, ParameterSpec};
use crate::context::ContextType;

/// Built-in commands in registration order.
pub fn builtin_commands() -> Vec<(Option<ContextType>, Command)> {
    let mut commands = Vec::new();
    commands.extend(global_commands().into_iter().map(|c| (None, c)));
    for (ctx, set) in [
        (ContextType::TaskManagement, task_commands()),
        (ContextType::Messaging, messaging_commands()),
        (ContextType::Settings, settings_commands()),
        (ContextType::Browsing, browsing_commands()),
        (ContextType::Development, development_commands()),
        (ContextType::Media, media_commands()),
    ] {
        commands.extend(set.into_iter().map(|c| (Some(ctx), c)));
    }
    commands
}

fn global_commands() -> Vec<Command> {
    vec![
        Command::new("help", "Help", CommandCategory::Help)
            .with_description("List what can be said in the current context")
            .with_pattern("help")
            .with_pattern("what can i say")
            .with_pattern("show commands")
            .with_example("help")
            .with_example("what can i say"),
        Command::new("switch_context", "Switch Context", CommandCategory::Navigation)
            .with_description("Change the active operating context")
            .with_pattern("switch to {context} context")
            .with_pattern("go to {context} context")
            .with_pattern("switch context to {context}")
            .with_parameter(ParameterSpec::required("context", "Context to switch to"))
            .with_example("switch to messaging context")
            .with_example("go to settings context"),
        Command::new("cancel", "Cancel", CommandCategory::Navigation)
            .with_description("Abandon the current interaction")
            .with_pattern("cancel")
            .with_pattern("never mind")
            .with_example("cancel")
            .with_example("never mind"),
    ]
}

fn task_commands() -> Vec<Command> {
    vec![
        Command::new("create_task", "Create Task", CommandCategory::Tasks)
            .with_description("Add a task to the task list")
            .with_pattern("create task called {title}")
            .with_pattern("add task called {title}")
            .with_pattern("new task called {title}")
            .with_pattern("remind me to {title}")
            .with_parameter(ParameterSpec::required("title", "Task title (one word)"))
            .with_parameter(ParameterSpec::optional("priority", ParameterKind::Priority))
            .with_parameter(ParameterSpec::optional("due", ParameterKind::TimeReference))
            .with_example("create task called groceries")
            .with_example("add task called laundry")
            .with_example("remind me to stretch"),
        Command::new("complete_task", "Complete Task", CommandCategory::Tasks)
            .with_description("Mark a task as done")
            .with_pattern("complete task called {title}")
            .with_pattern("mark task {title} done")
            .with_pattern("mark {title} as done")
            .with_parameter(ParameterSpec::required("title", "Task to complete"))
            .with_example("complete task called groceries")
            .with_example("mark laundry as done"),
        Command::new("list_tasks", "List Tasks", CommandCategory::Tasks)
            .with_description("Read back the open tasks")
            .with_pattern("show my tasks")
            .with_pattern("list tasks")
            .with_pattern("what do i need to do")
            .with_example("show my tasks")
            .with_example("list tasks"),
        Command::new("delete_task", "Delete Task", CommandCategory::Tasks)
            .with_description("Remove a task permanently")
            .with_pattern("delete task called {title}")
            .with_pattern("remove task called {title}")
            .with_parameter(ParameterSpec::required("title", "Task to delete"))
            .sensitive()
            .with_example("delete task called groceries"),
    ]
}

fn messaging_commands() -> Vec<Command> {
    vec![
        Command::new("send_message", "Send Message", CommandCategory::Communication)
            .with_description("Start a message to a contact")
            .with_pattern("send message to {recipient}")
            .with_pattern("send text to {recipient}")
            .with_parameter(ParameterSpec::required("recipient", "Contact to message"))
            .sensitive()
            .with_example("send message to alice")
            .with_example("send text to bob"),
        Command::new("read_messages", "Read Messages", CommandCategory::Communication)
            .with_description("Read unread messages aloud")
            .with_pattern("read my messages")
            .with_pattern("read messages")
            .with_pattern("check messages")
            .with_example("read my messages")
            .with_example("check messages"),
        Command::new("reply_message", "Reply", CommandCategory::Communication)
            .with_description("Reply in the open conversation")
            .with_pattern("send a reply to {recipient}")
            .with_pattern("write a reply to {recipient}")
            .with_parameter(ParameterSpec::optional("recipient", ParameterKind::Text))
            .with_example("send a reply to carol"),
    ]
}

fn settings_commands() -> Vec<Command> {
    vec![
        Command::new("change_theme", "Change Theme", CommandCategory::Settings)
            .with_description("Switch the colour theme")
            .with_pattern("set theme to {theme}")
            .with_pattern("switch theme to {theme}")
            .with_pattern("enable dark mode")
            .with_parameter(ParameterSpec::optional("theme", ParameterKind::Text))
            .with_example("set theme to dark")
            .with_example("enable dark mode"),
        Command::new("set_volume", "Set Volume", CommandCategory::Settings)
            .with_description("Change the output volume")
            .with_pattern("set volume to {level}")
            .with_pattern("change volume to {level}")
            .with_parameter(ParameterSpec::required("level", "Volume level 0-100"))
            .with_example("set volume to 40"),
        Command::new("reset_settings", "Reset Settings", CommandCategory::System)
            .with_description("Restore every setting to its default")
            .with_pattern("reset all settings")
            .with_pattern("restore default settings")
            .sensitive()
            .confirm_first()
            .with_example("reset all settings"),
    ]
}

fn browsing_commands() -> Vec<Command> {
    vec![
        Command::new("open_website", "Open Website", CommandCategory::Browsing)
            .with_description("Navigate the browser to a site")
            .with_pattern("open the website {site}")
            .with_pattern("go to website {site}")
            .with_parameter(ParameterSpec::required("site", "Site address"))
            .with_example("open the website example.com")
            .with_example("go to website wikipedia.org"),
        Command::new("search_web", "Search Web", CommandCategory::Browsing)
            .with_description("Run a web search")
            .with_pattern("search the web for {query}")
            .with_pattern("search online for {query}")
            .with_pattern("look up {query} online")
            .with_parameter(ParameterSpec::required("query", "Search term (one word)"))
            .with_example("search the web for rust")
            .with_example("look up weather online"),
        Command::new("bookmark_page", "Bookmark Page", CommandCategory::Browsing)
            .with_description("Bookmark the current page")
            .with_pattern("bookmark this page")
            .with_pattern("save bookmark")
            .with_example("bookmark this page"),
    ]
}

fn development_commands() -> Vec<Command> {
    vec![
        Command::new("run_tests", "Run Tests", CommandCategory::Development)
            .with_description("Run the project's test suite")
            .with_pattern("run tests")
            .with_pattern("run the tests")
            .with_pattern("run test suite")
            .with_example("run tests"),
        Command::new("open_file", "Open File", CommandCategory::Development)
            .with_description("Open a file in the editor")
            .with_pattern("open the file {path}")
            .with_pattern("edit the file {path}")
            .with_parameter(ParameterSpec::required("path", "File path"))
            .with_example("open the file main.rs"),
        Command::new("commit_changes", "Commit Changes", CommandCategory::Development)
            .with_description("Commit staged changes")
            .with_pattern("commit changes")
            .with_pattern("commit with message {message}")
            .with_parameter(ParameterSpec::optional("message", ParameterKind::Text))
            .with_example("commit changes"),
        Command::new("delete_branch", "Delete Branch", CommandCategory::Development)
            .with_description("Delete a local branch")
            .with_pattern("delete the branch {branch}")
            .with_pattern("delete local branch {branch}")
            .with_parameter(ParameterSpec::required("branch", "Branch name"))
            .sensitive()
            .with_example("delete the branch feature"),
        Command::new("shutdown_server", "Shutdown Server", CommandCategory::System)
            .with_description("Stop the local development server")
            .with_pattern("shutdown server")
            .with_pattern("shut down the server")
            .sensitive()
            .with_example("shutdown server"),
    ]
}

fn media_commands() -> Vec<Command> {
    vec![
        Command::new("play_music", "Play Music", CommandCategory::Media)
            .with_description("Start or resume playback")
            .with_pattern("play some {track} music")
            .with_pattern("play the song {track}")
            .with_pattern("play music")
            .with_pattern("resume playback")
            .with_parameter(ParameterSpec::optional("track", ParameterKind::Text))
            .with_example("play music")
            .with_example("play some jazz music"),
        Command::new("pause_music", "Pause Music", CommandCategory::Media)
            .with_description("Pause playback")
            .with_pattern("pause")
            .with_pattern("pause music")
            .with_pattern("stop music")
            .with_example("pause music")
            .with_example("stop music"),
        Command::new("next_track", "Next Track", CommandCategory::Media)
            .with_description("Skip to the next track")
            .with_pattern("next track")
            .with_pattern("skip song")
            .with_pattern("next song")
            .with_example("next track")
            .with_example("skip song"),
    ]
}

/// Command ids suggested when there is too little usage history to rank.
pub const DEFAULT_SUGGESTIONS: &[&str] = &["help", "create_task", "list_tasks", "read_messages"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{MIN_MATCH_SCORE, score_template};
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let commands = builtin_commands();
        let ids: HashSet<&str> = commands.iter().map(|(_, c)| c.id.as_str()).collect();
        assert_eq!(ids.len(), commands.len());
    }

    #[test]
    fn every_command_has_patterns_and_examples() {
        for (_, command) in builtin_commands() {
            assert!(!command.patterns.is_empty(), "{} has no patterns", command.id);
            assert!(!command.examples.is_empty(), "{} has no examples", command.id);
        }
    }

    #[test]
    fn placeholders_are_declared_parameters() {
        for (_, command) in builtin_commands() {
            for pattern in &command.patterns {
                for token in pattern.split_whitespace() {
                    if let Some(name) = crate::commands::placeholder_name(token) {
                        assert!(
                            command.parameter(name).is_some(),
                            "{}: placeholder {{{name}}} is not declared",
                            command.id
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn templates_keep_noise_below_threshold() {
        for (_, command) in builtin_commands() {
            for pattern in &command.patterns {
                let len = pattern.split_whitespace().count();
                for n in 1..=len + 2 {
                    let noise: Vec<String> = (0..n).map(|i| format!("qzx{i}")).collect();
                    let m = score_template(&noise.join(" "), pattern);
                    assert!(
                        m.score <= MIN_MATCH_SCORE,
                        "{}: {pattern:?} scores {} on {n} words of noise",
                        command.id,
                        m.score
                    );
                }
            }
        }
    }

    #[test]
    fn default_suggestions_exist() {
        let commands = builtin_commands();
        for id in DEFAULT_SUGGESTIONS {
            assert!(commands.iter().any(|(_, c)| c.id == *id), "{id} missing");
        }
    }
}
