//! Line-oriented terminal front end: input commands and transcript output.

pub mod command;
pub mod transcript;

pub use command::{Command, HELP};
pub use transcript::{Transcript, format_conversation, format_entry, format_timestamp};
