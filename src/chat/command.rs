//! Operator commands: `{prefix}{name} {args...}`.

use std::fmt;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check.
    Ping,
    /// Report the invoking channel and guild ids.
    Info,
    /// Make the invoking channel the relay destination.
    SetDestination,
    /// Post `title`/`body` to the forum.
    Relay { title: String, body: String },
    Help,
    Unknown(String),
}

/// Malformed command arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("{command} expects {expected} arguments, got {got}")]
    WrongArgCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("title must not be empty")]
    EmptyTitle,
}

impl Command {
    /// Parse a chat message.
    ///
    /// Returns `None` when the message is not addressed to the bot.
    pub fn parse(prefix: &str, content: &str) -> Option<Result<Command, CommandError>> {
        let rest = content.strip_prefix(prefix)?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return None;
        }
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args),
            None => (rest, ""),
        };

        let command = match name {
            "ping" => Ok(Command::Ping),
            "info" => Ok(Command::Info),
            "set-destination" | "set_channel" => Ok(Command::SetDestination),
            "relay" | "reddit" => parse_relay(args),
            "help" => Ok(Command::Help),
            other => Ok(Command::Unknown(other.to_string())),
        };
        Some(command)
    }

    /// One-line usage for each command.
    pub fn help(prefix: &str) -> String {
        format!(
            "Commands:\n\
             \t{prefix}ping - check the bot is alive\n\
             \t{prefix}info - show channel and guild ids\n\
             \t{prefix}set-destination - relay forum posts to this channel\n\
             \t{prefix}relay \"<title>\" \"<body>\" - post to the forum"
        )
    }

    /// Usage string for the relay command.
    pub fn relay_usage(prefix: &str) -> String {
        format!("Usage: {prefix}relay \"<title>\" \"<body>\"")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => f.write_str("ping"),
            Command::Info => f.write_str("info"),
            Command::SetDestination => f.write_str("set-destination"),
            Command::Relay { .. } => f.write_str("relay"),
            Command::Help => f.write_str("help"),
            Command::Unknown(name) => write!(f, "unknown({name})"),
        }
    }
}

fn parse_relay(args: &str) -> Result<Command, CommandError> {
    let mut args = split_args(args)?;
    if args.len() != 2 {
        return Err(CommandError::WrongArgCount {
            command: "relay",
            expected: 2,
            got: args.len(),
        });
    }
    let body = args.pop().unwrap_or_default();
    let title = args.pop().unwrap_or_default();
    if title.trim().is_empty() {
        return Err(CommandError::EmptyTitle);
    }
    Ok(Command::Relay { title, body })
}

/// Split on whitespace, keeping double-quoted runs together.
///
/// Inside quotes, `\"` and `\\` are escapes.
pub fn split_args(input: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => match chars.peek() {
                Some(&next @ ('"' | '\\')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(CommandError::UnterminatedQuote);
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
