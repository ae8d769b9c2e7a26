//! Parsing of input lines into commands.

use parley_proto::message::ConversationId;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to send to the open conversation.
    Send(String),
    /// `/new [title]`: create and open a conversation.
    New(Option<String>),
    /// `/list`: show recent conversations.
    List,
    /// `/title [text]`: retitle the open conversation; no text clears it.
    Title(Option<String>),
    /// `/open <id>`: switch to a conversation.
    Open(ConversationId),
    /// `/refresh`: poll now.
    Refresh,
    /// `/help`: show the command list.
    Help,
    /// `/quit`: exit.
    Quit,
    /// A `/` command that could not be parsed.
    Invalid(String),
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name {
            "new" => Self::New((!arg.is_empty()).then(|| arg.to_string())),
            "list" => Self::List,
            "title" => Self::Title((!arg.is_empty()).then(|| arg.to_string())),
            "open" => match arg.parse() {
                Ok(id) => Self::Open(id),
                Err(_) => Self::Invalid(format!("usage: /open <id> (got {arg:?})")),
            },
            "refresh" => Self::Refresh,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Invalid(format!("unknown command /{other}")),
        };
        Some(command)
    }
}

/// Shown for `/help`.
pub const HELP: &str = "\
commands:
  /new [title]   create and open a conversation
  /list          list recent conversations
  /open <id>     open a conversation
  /title [text]  rename the open conversation (no text clears the title)
  /refresh       fetch new messages now
  /quit          exit
anything else is sent as a message";
