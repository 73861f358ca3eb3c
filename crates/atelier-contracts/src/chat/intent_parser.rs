use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, BACKGROUND_COMMAND, INDEX_ARG_COMMANDS, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS,
    POSE_COMMAND, SINGLE_PATH_COMMANDS, TEXT_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> &str {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn arg_strings(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn arg_index(&self, key: &str) -> Option<usize> {
        self.command_args
            .get(key)
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Splits `head rest...` and lowercases the head word.
fn split_head(arg: &str) -> (String, String) {
    let trimmed = arg.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_ascii_lowercase(), rest.trim().to_string()),
        None => (trimmed.to_ascii_lowercase(), String::new()),
    }
}

fn strip_quotes(text: &str) -> String {
    let trimmed = text.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn parse_pose(raw: &str, arg: &str) -> Intent {
    let (head, rest) = split_head(arg);
    Intent::new("set_pose", raw)
        .with_arg("pose", Value::String(head))
        .with_arg("text", Value::String(strip_quotes(&rest)))
}

fn parse_background(raw: &str, arg: &str) -> Intent {
    let (head, rest) = split_head(arg);
    let (mode, text) = match head.as_str() {
        "outfit" if rest.is_empty() => ("outfit", String::new()),
        "clear" | "original" | "keep" if rest.is_empty() => ("clear", String::new()),
        "" => ("clear", String::new()),
        _ => ("text", strip_quotes(arg)),
    };
    Intent::new("set_background", raw)
        .with_arg("mode", Value::String(mode.to_string()))
        .with_arg("text", Value::String(text))
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if command == POSE_COMMAND {
                return parse_pose(text, arg);
            }

            if command == BACKGROUND_COMMAND {
                return parse_background(text, arg);
            }

            if let Some(action) = find_action(&command, TEXT_ARG_COMMANDS) {
                return Intent::new(action, text).with_arg("text", Value::String(strip_quotes(arg)));
            }

            if let Some(action) = find_action(&command, INDEX_ARG_COMMANDS) {
                let intent = Intent::new(action, text);
                return match arg.parse::<u64>() {
                    Ok(index) => intent.with_arg("index", Value::from(index)),
                    Err(_) => intent.with_arg("invalid", Value::String(arg.to_string())),
                };
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(parse_single_path_arg(arg)));
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                return Intent::new(action, text).with_arg(
                    "paths",
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    Intent::new("set_custom_edit", text).with_arg("text", Value::String(raw_trimmed.to_string()))
}
