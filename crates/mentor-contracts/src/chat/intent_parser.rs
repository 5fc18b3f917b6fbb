use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, EXPORT_COMMAND, NO_ARG_COMMANDS, PAGE_COMMANDS, RAW_ARG_COMMANDS,
};
use crate::pages::Page;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    parts
        .into_iter()
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>()
        .join(" ")
}

/// Parses one line of chat input.
///
/// Slash commands switch pages or adjust the session; anything else is a
/// prompt for the active page. A command name starts with a letter, so
/// `/2 + 2` is a prompt, and a leading `//` sends the rest with a single
/// `/`. Blank lines are still submissions so the active page can warn about
/// the missing prompt.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();

    if raw_trimmed.starts_with("//") {
        let escaped = text.replacen('/', "", 1);
        return submit_intent(&escaped);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let starts_with_letter = slash_tail
            .chars()
            .next()
            .map(|ch| ch.is_ascii_alphabetic())
            .unwrap_or(false);
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if starts_with_letter && command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if PAGE_COMMANDS.iter().any(|value| *value == command) {
                if let Some(page) = Page::from_name(&command) {
                    let mut intent = Intent::new("select_page");
                    intent
                        .command_args
                        .insert("page".to_string(), Value::String(page.slug().to_string()));
                    return intent;
                }
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action);
                intent
                    .command_args
                    .insert("model".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action);
            }

            if command == EXPORT_COMMAND.command {
                let mut intent = Intent::new(EXPORT_COMMAND.action);
                let path = parse_single_path_arg(arg);
                intent.command_args.insert(
                    "path".to_string(),
                    if path.is_empty() {
                        Value::Null
                    } else {
                        Value::String(path)
                    },
                );
                return intent;
            }

            let mut intent = Intent::new("unknown");
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    submit_intent(text)
}

fn submit_intent(text: &str) -> Intent {
    let mut intent = Intent::new("submit");
    intent.prompt = Some(text.trim_end_matches(['\n', '\r']).to_string());
    intent
}
