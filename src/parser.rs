//! Deterministic, pattern-based command parsing.
//!
//! Every eligible command's templates are scored against the input:
//!
//! - an exact (case-insensitive) full-string match scores `1.0`;
//! - otherwise tokens are compared position by position: a literal match
//!   adds `1.0`, a `{placeholder}` consumes one input token and adds `0.8`,
//!   a mismatch subtracts `0.2`; the sum is divided by the template length
//!   and floored at `0`.
//!
//! A command whose templates all score zero falls back to keyword overlap
//! with its name, scaled to at most `0.5`. The two scales are not
//! calibrated against each other.
//!
//! Placeholders capture exactly one token, so "create task called buy
//! groceries" yields `title = "buy"`. Multi-word values are not supported.

use crate::commands::{Command, CommandRegistry, ParameterKind, placeholder_name};
use crate::context::ContextType;
use std::collections::HashMap;
use std::sync::Arc;

/// Scores at or below this never produce a match.
pub const MIN_MATCH_SCORE: f32 = 0.1;

/// Weight applied to the keyword-overlap fallback.
pub const KEYWORD_FALLBACK_WEIGHT: f32 = 0.5;

const LITERAL_MATCH: f32 = 1.0;
const PLACEHOLDER_MATCH: f32 = 0.8;
const MISMATCH_PENALTY: f32 = 0.2;

/// Which scoring path produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Input equals a template exactly.
    Exact,
    /// Positional token scoring.
    Pattern,
    /// Keyword-overlap fallback.
    Keyword,
}

/// A command chosen for some input, with its captured parameters.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub command: Arc<Command>,
    pub parameters: HashMap<String, String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
    pub raw_text: String,
    pub match_kind: MatchKind,
    /// Template that produced the score (None for keyword matches).
    pub matched_template: Option<String>,
}

/// Score of a single template against tokenized input.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub score: f32,
    pub exact: bool,
    pub parameters: HashMap<String, String>,
}

/// Score one template. `input` is the trimmed raw text.
pub fn score_template(input: &str, template: &str) -> TemplateMatch {
    let template = template.trim();
    if input.to_lowercase() == template.to_lowercase() {
        return TemplateMatch {
            score: 1.0,
            exact: true,
            parameters: HashMap::new(),
        };
    }

    let input_tokens: Vec<&str> = input.split_whitespace().collect();
    let template_tokens: Vec<&str> = template.split_whitespace().collect();
    if template_tokens.is_empty() {
        return TemplateMatch {
            score: 0.0,
            exact: false,
            parameters: HashMap::new(),
        };
    }

    let mut score = 0.0_f32;
    let mut parameters = HashMap::new();
    for (i, template_token) in template_tokens.iter().enumerate() {
        let input_token = input_tokens.get(i);
        if let Some(name) = placeholder_name(template_token) {
            // A placeholder past the end of the input contributes nothing.
            if let Some(value) = input_token {
                parameters.insert(name.to_owned(), (*value).to_owned());
                score += PLACEHOLDER_MATCH;
            }
        } else if input_token.is_some_and(|t| t.to_lowercase() == template_token.to_lowercase()) {
            score += LITERAL_MATCH;
        } else {
            score -= MISMATCH_PENALTY;
        }
    }

    TemplateMatch {
        score: (score / template_tokens.len() as f32).max(0.0),
        exact: false,
        parameters,
    }
}

/// Fraction of the command's name keywords present in the input, scaled
/// by [`KEYWORD_FALLBACK_WEIGHT`].
pub fn keyword_score(command: &Command, input: &str) -> f32 {
    let keywords = command.keywords();
    if keywords.is_empty() {
        return 0.0;
    }
    let input_tokens: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
    let hits = keywords
        .iter()
        .filter(|k| input_tokens.iter().any(|t| t == *k))
        .count();
    hits as f32 / keywords.len() as f32 * KEYWORD_FALLBACK_WEIGHT
}

/// Best score for one command, before the global comparison.
#[derive(Debug, Clone)]
pub struct CommandScore {
    pub command: Arc<Command>,
    pub score: f32,
    pub match_kind: MatchKind,
    pub template: Option<String>,
    pub parameters: HashMap<String, String>,
}

/// Score a command: best template, or keyword fallback if none is positive.
pub fn score_command(command: &Arc<Command>, input: &str) -> CommandScore {
    let mut best: Option<(TemplateMatch, &String)> = None;
    for template in &command.patterns {
        let m = score_template(input, template);
        if best.as_ref().is_none_or(|(b, _)| m.score > b.score) {
            best = Some((m, template));
        }
    }

    match best {
        Some((m, template)) if m.score > 0.0 => CommandScore {
            command: Arc::clone(command),
            score: m.score,
            match_kind: if m.exact { MatchKind::Exact } else { MatchKind::Pattern },
            template: Some(template.clone()),
            parameters: m.parameters,
        },
        _ => CommandScore {
            command: Arc::clone(command),
            score: keyword_score(command, input),
            match_kind: MatchKind::Keyword,
            template: None,
            parameters: HashMap::new(),
        },
    }
}

/// Turns free text into the best-matching registered command.
#[derive(Debug, Clone)]
pub struct CommandParser {
    registry: Arc<CommandRegistry>,
}

impl CommandParser {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Parse `text` against the commands eligible in `context`.
    ///
    /// Returns `None` when nothing scores above [`MIN_MATCH_SCORE`]. Ties go
    /// to the command evaluated first.
    pub fn parse(&self, text: &str, context: Option<ContextType>) -> Option<ParsedCommand> {
        let input = text.trim();
        if input.is_empty() {
            return None;
        }

        let commands = self.registry.get_commands(context);
        let mut best: Option<CommandScore> = None;
        for command in commands.iter() {
            let scored = score_command(command, input);
            if best.as_ref().is_none_or(|b| scored.score > b.score) {
                best = Some(scored);
            }
        }

        let best = best.filter(|b| b.score > MIN_MATCH_SCORE);
        let Some(best) = best else {
            tracing::debug!(text = %input, "no command matched");
            return None;
        };

        let mut parameters = best.parameters;
        enrich_parameters(&best.command, input, &mut parameters);

        tracing::debug!(
            command_id = %best.command.id,
            confidence = best.score,
            kind = ?best.match_kind,
            "parsed command"
        );

        Some(ParsedCommand {
            command: best.command,
            parameters,
            confidence: best.score.min(1.0),
            raw_text: input.to_owned(),
            match_kind: best.match_kind,
            matched_template: best.template,
        })
    }

    /// Highest score seen for `text`, matched or not. Used for diagnostics.
    pub fn best_score(&self, text: &str, context: Option<ContextType>) -> Option<f32> {
        let input = text.trim();
        self.registry
            .get_commands(context)
            .iter()
            .map(|c| score_command(c, input).score)
            .reduce(f32::max)
    }
}

/// Fill non-placeholder parameters (priority, time references) from the raw
/// text. Never overrides a captured value and never changes the score.
fn enrich_parameters(command: &Command, input: &str, parameters: &mut HashMap<String, String>) {
    let lowered: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
    for spec in &command.parameters {
        if parameters.contains_key(&spec.name) {
            continue;
        }
        let value = match spec.kind {
            ParameterKind::Text => None,
            ParameterKind::Priority => Some(extract_priority(&lowered).to_owned()),
            ParameterKind::TimeReference => extract_time_reference(&lowered),
        };
        if let Some(value) = value {
            parameters.insert(spec.name.clone(), value);
        }
    }
}

/// Urgency from the wording: `high`, `low`, or `medium`.
pub fn extract_priority(tokens: &[String]) -> &'static str {
    let has = |word: &str| tokens.iter().any(|t| t.trim_matches(|c: char| !c.is_alphanumeric()) == word);
    let phrase = tokens.join(" ");
    if ["urgent", "asap", "immediately", "urgently"].iter().any(|w| has(w))
        || phrase.contains("high priority")
    {
        "high"
    } else if ["whenever", "someday", "eventually"].iter().any(|w| has(w))
        || phrase.contains("low priority")
    {
        "low"
    } else {
        "medium"
    }
}

const DAY_WORDS: &[&str] = &[
    "today", "tonight", "tomorrow", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday",
];

const UNIT_WORDS: &[&str] = &[
    "minute", "minutes", "hour", "hours", "day", "days", "week", "weeks", "month", "months",
];

/// First time phrase in the input, e.g. "by tomorrow", "in 3 days", "at 5pm".
pub fn extract_time_reference(tokens: &[String]) -> Option<String> {
    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).map(String::as_str);
        let after = tokens.get(i + 2).map(String::as_str);
        match (token.as_str(), next) {
            ("by" | "before" | "until", Some(day)) if DAY_WORDS.contains(&day) => {
                return Some(format!("{token} {day}"));
            }
            ("by" | "before" | "until", Some("next")) => {
                if let Some(period) = after.filter(|p| matches!(*p, "week" | "month")) {
                    return Some(format!("{token} next {period}"));
                }
            }
            ("by" | "before" | "until", Some("end")) if after == Some("of") => {
                if let Some(period) = tokens.get(i + 3) {
                    return Some(format!("{token} end of {period}"));
                }
            }
            ("in" | "within", Some(count)) if count.parse::<u32>().is_ok() => {
                if let Some(unit) = after.filter(|u| UNIT_WORDS.contains(u)) {
                    return Some(format!("{token} {count} {unit}"));
                }
            }
            ("at" | "on", Some(time)) if looks_like_clock_time(time) => {
                return Some(format!("{token} {time}"));
            }
            _ => {}
        }
    }
    None
}

fn looks_like_clock_time(token: &str) -> bool {
    let digits = token
        .strip_suffix("am")
        .or_else(|| token.strip_suffix("pm"))
        .unwrap_or(token);
    let (hour, minute) = match digits.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (digits, None),
    };
    let hour_ok = hour.parse::<u32>().is_ok_and(|h| h <= 24) && !hour.is_empty();
    let minute_ok = minute.is_none_or(|m| m.len() == 2 && m.parse::<u32>().is_ok_and(|m| m < 60));
    // A bare number like "on 3" is too ambiguous without am/pm or minutes.
    hour_ok && minute_ok && (minute.is_some() || digits.len() != token.len())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::commands::{CommandCategory, builtin::builtin_commands};

    fn parser() -> CommandParser {
        CommandParser::new(Arc::new(CommandRegistry::with_builtin()))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn exact_template_scores_one() {
        let m = score_template("Show My Tasks", "show my tasks");
        assert!(m.exact);
        assert!(approx(m.score, 1.0));
    }

    #[test]
    fn placeholder_and_literals_score_positionally() {
        let m = score_template("create task groceries", "create task {title}");
        assert!(approx(m.score, 2.8 / 3.0));
        assert_eq!(m.parameters.get("title").map(String::as_str), Some("groceries"));
    }

    #[test]
    fn mismatches_are_penalised_and_floored() {
        let m = score_template("delete task groceries", "create task {title}");
        assert!(approx(m.score, 1.6 / 3.0));

        let m = score_template("totally unrelated", "send message to {recipient}");
        assert!(approx(m.score, 0.0));
    }

    #[test]
    fn missing_input_for_placeholder_adds_nothing() {
        let m = score_template("play", "play {track}");
        assert!(approx(m.score, 0.5));
        assert!(m.parameters.is_empty());
    }

    #[test]
    fn parameter_values_keep_original_case() {
        let m = score_template("Open File Main.rs", "open file {path}");
        assert_eq!(m.parameters.get("path").map(String::as_str), Some("Main.rs"));
    }

    #[test]
    fn keyword_fallback_is_capped_at_half() {
        let cmd = Command::new("list_tasks", "List Tasks", CommandCategory::Tasks);
        assert!(approx(keyword_score(&cmd, "tasks list please"), 0.5));
        assert!(approx(keyword_score(&cmd, "tasks please"), 0.25));
        assert!(approx(keyword_score(&cmd, "nothing here"), 0.0));
    }

    #[test]
    fn keyword_fallback_only_used_without_positive_template_score() {
        let p = parser();
        let parsed = p
            .parse("tasks list please", Some(ContextType::TaskManagement))
            .unwrap();
        assert_eq!(parsed.command.id, "list_tasks");
        assert_eq!(parsed.match_kind, MatchKind::Keyword);
        // Fallback scale (0-0.5) beats weak positional scores (0.05 here);
        // the two scales are not calibrated against each other.
        assert!(approx(parsed.confidence, 0.5));
    }

    #[test]
    fn gibberish_does_not_match() {
        let p = parser();
        assert!(p.parse("   ", None).is_none());
        for text in [
            "zxqvblorf",
            "hello world",
            "blah blah blah",
            "zxqv blorf wug",
            "flib flob flub flab",
            "the quick brown fox jumps",
        ] {
            assert!(p.parse(text, None).is_none(), "{text:?} matched");
            for ctx in ContextType::all() {
                assert!(p.parse(text, Some(*ctx)).is_none(), "{text:?} matched in {ctx}");
            }
            assert!(p.best_score(text, None).unwrap() < MIN_MATCH_SCORE, "{text:?}");
        }
    }

    #[test]
    fn weakly_anchored_templates_let_noise_through() {
        // A placeholder earns 0.8 for any token, so a template needs three
        // literal words before unrelated input stays under the threshold.
        let m = score_template("zxqv blorf", "message {recipient}");
        assert!(approx(m.score, 0.3));
        let m = score_template("zxqv blorf wug", "create task {title}");
        assert!(approx(m.score, 0.4 / 3.0));
        let m = score_template("zxqv blorf wug flib", "send message to {recipient}");
        assert!(approx(m.score, 0.05));
    }

    #[test]
    fn every_builtin_example_parses_to_its_command() {
        let p = parser();
        for (scope, command) in builtin_commands() {
            for example in &command.examples {
                let parsed = p
                    .parse(example, scope)
                    .unwrap_or_else(|| panic!("{example:?} did not parse"));
                assert_eq!(parsed.command.id, command.id, "example {example:?}");
                assert!(parsed.confidence >= 0.5, "example {example:?}");
            }
        }
    }

    #[test]
    fn create_task_captures_single_token_title() {
        let p = parser();
        let parsed = p
            .parse("create task buy groceries", Some(ContextType::TaskManagement))
            .unwrap();
        assert_eq!(parsed.command.id, "create_task");
        // "buy" sits on the literal "called" and costs 0.2; the slot takes
        // the single token that lines up with it.
        assert_eq!(parsed.parameters.get("title").map(String::as_str), Some("groceries"));
        assert!(approx(parsed.confidence, 2.6 / 4.0));
        assert_eq!(parsed.raw_text, "create task buy groceries");

        // Placeholders capture one token: "groceries" is dropped.
        let parsed = p
            .parse("create task called buy groceries", Some(ContextType::TaskManagement))
            .unwrap();
        assert_eq!(parsed.parameters.get("title").map(String::as_str), Some("buy"));
        assert!(parsed.confidence >= 0.5);
    }

    #[test]
    fn ties_resolve_to_first_registered() {
        let registry = CommandRegistry::new();
        registry
            .add_command(Command::new("first", "First", CommandCategory::Help).with_pattern("ping"), None)
            .unwrap();
        registry
            .add_command(Command::new("second", "Second", CommandCategory::Help).with_pattern("ping"), None)
            .unwrap();
        let parsed = CommandParser::new(Arc::new(registry)).parse("ping", None).unwrap();
        assert_eq!(parsed.command.id, "first");
    }

    #[test]
    fn context_narrows_eligible_commands() {
        let p = parser();
        let in_tasks = p.parse("play some jazz music", Some(ContextType::TaskManagement));
        assert!(in_tasks.is_none_or(|c| c.command.id != "play_music"));
        assert_eq!(
            p.parse("play some jazz music", Some(ContextType::Media)).unwrap().command.id,
            "play_music"
        );
        assert_eq!(p.parse("play some jazz music", None).unwrap().command.id, "play_music");
    }

    #[test]
    fn runtime_registered_command_is_parsed() {
        let registry = Arc::new(CommandRegistry::with_builtin());
        let p = CommandParser::new(Arc::clone(&registry));
        registry
            .add_command(
                Command::new("water_plants", "Water Plants", CommandCategory::Tasks)
                    .with_pattern("water the plants"),
                Some(ContextType::TaskManagement),
            )
            .unwrap();
        let parsed = p.parse("water the plants", Some(ContextType::TaskManagement)).unwrap();
        assert_eq!(parsed.command.id, "water_plants");
        assert_eq!(parsed.match_kind, MatchKind::Exact);
    }

    #[test]
    fn priority_and_due_are_extracted() {
        let p = parser();
        let parsed = p
            .parse("create task called taxes urgent by friday", Some(ContextType::TaskManagement))
            .unwrap();
        assert_eq!(parsed.parameters.get("title").map(String::as_str), Some("taxes"));
        assert_eq!(parsed.parameters.get("priority").map(String::as_str), Some("high"));
        assert_eq!(parsed.parameters.get("due").map(String::as_str), Some("by friday"));
    }

    #[test]
    fn priority_defaults_to_medium() {
        let p = parser();
        let parsed = p
            .parse("add task called laundry", Some(ContextType::TaskManagement))
            .unwrap();
        assert_eq!(parsed.parameters.get("priority").map(String::as_str), Some("medium"));
        assert!(!parsed.parameters.contains_key("due"));
    }

    #[test]
    fn time_reference_variants() {
        let toks = |s: &str| s.split_whitespace().map(str::to_owned).collect::<Vec<_>>();
        assert_eq!(extract_time_reference(&toks("do it in 3 days")).as_deref(), Some("in 3 days"));
        assert_eq!(extract_time_reference(&toks("call at 5pm")).as_deref(), Some("at 5pm"));
        assert_eq!(extract_time_reference(&toks("meet at 10:30")).as_deref(), Some("at 10:30"));
        assert_eq!(
            extract_time_reference(&toks("ship before next week")).as_deref(),
            Some("before next week")
        );
        assert_eq!(
            extract_time_reference(&toks("finish by end of day")).as_deref(),
            Some("by end of day")
        );
        assert_eq!(extract_time_reference(&toks("look at 3 cats")), None);
        assert_eq!(extract_time_reference(&toks("nothing here")), None);
    }

    #[test]
    fn low_priority_words() {
        let toks = |s: &str| s.split_whitespace().map(str::to_owned).collect::<Vec<_>>();
        assert_eq!(extract_priority(&toks("paint fence someday")), "low");
        assert_eq!(extract_priority(&toks("this is low priority")), "low");
        assert_eq!(extract_priority(&toks("fix it asap!")), "high");
    }
}
