//! Command Parsing
//!
//! Turns message text into a [`Command`]. Parsing never fails outright:
//! malformed input becomes a [`Command::Invalid`] carrying the text to
//! reply with.

/// Usage line for `create`
pub const CREATE_USAGE: &str =
    "Error: not enough arguments. Usage: create \"Title\" \"Option 1\" \"Option 2\" ...";
/// Usage line for `vote`
pub const VOTE_USAGE: &str = "Error: not enough arguments. Usage: vote [poll ID] [option number]";

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { title: String, options: Vec<String> },
    Vote { poll_id: String, position: u32 },
    Results { poll_id: String },
    Finish { poll_id: String },
    Delete { poll_id: String },
    Help,
    /// Recognized command with bad arguments; holds the reply text
    Invalid(String),
}

impl Command {
    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Vote { .. } => "vote",
            Command::Results { .. } => "results",
            Command::Finish { .. } => "finish",
            Command::Delete { .. } => "delete",
            Command::Help => "help",
            Command::Invalid(_) => "invalid",
        }
    }
}

/// Parse a message with bot mentions already removed
pub fn parse_command(text: &str) -> Command {
    let text = text.trim();
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match head.to_lowercase().as_str() {
        "create" | "new" | "poll" => parse_create(rest),
        "vote" => parse_vote(&args),
        "results" => with_poll_id(&args, "results", |poll_id| Command::Results { poll_id }),
        "finish" => with_poll_id(&args, "finish", |poll_id| Command::Finish { poll_id }),
        "delete" => with_poll_id(&args, "delete", |poll_id| Command::Delete { poll_id }),
        _ => Command::Help,
    }
}

fn parse_create(rest: &str) -> Command {
    if rest.is_empty() {
        return Command::Invalid(CREATE_USAGE.to_string());
    }

    let mut parts = split_quoted(rest)
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    let title = parts.next();
    let options: Vec<String> = parts.collect();
    match title {
        Some(title) if options.len() >= 2 => Command::Create { title, options },
        _ => Command::Invalid(
            "Error: a title and at least 2 options in double quotes are required.".to_string(),
        ),
    }
}

fn parse_vote(args: &[&str]) -> Command {
    let [poll_id, position, ..] = args else {
        return Command::Invalid(VOTE_USAGE.to_string());
    };
    // Range checks against the poll happen in the service.
    match position.parse::<u32>() {
        Ok(position) => Command::Vote {
            poll_id: poll_id.to_string(),
            position,
        },
        Err(_) if position.parse::<i64>().is_ok() => Command::Invalid(
            "Error: option number must be between 1 and the number of options.".to_string(),
        ),
        Err(_) => Command::Invalid("Error: option number must be a number.".to_string()),
    }
}

fn with_poll_id(args: &[&str], name: &str, build: impl FnOnce(String) -> Command) -> Command {
    match args.first() {
        Some(poll_id) => build(poll_id.to_string()),
        None => Command::Invalid(format!(
            "Error: a poll ID is required. Usage: {} [poll ID]",
            name
        )),
    }
}

/// Collect the text inside double quotes.
///
/// Text outside quotes is dropped. An unterminated final quote still yields
/// its text.
pub fn split_quoted(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in text.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            if !in_quotes && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        } else if in_quotes {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
