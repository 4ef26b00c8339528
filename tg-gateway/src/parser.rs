//! Leading-`/` command parsing.

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|s| s.as_str())
    }

    pub fn int_arg(&self, index: usize) -> Option<i64> {
        self.arg(index).and_then(|raw| raw.parse().ok())
    }
}

/// `/cmd arg1 arg2` -> command without the slash plus whitespace-split
/// args. Non-command text parses to `None`.
pub fn parse(text: &str) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let head = parts.next()?;
    let command = head.trim_start_matches('/');
    if command.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        command: command.to_string(),
        args: parts.map(|s| s.to_string()).collect(),
    })
}
