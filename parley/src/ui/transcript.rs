//! Line-oriented rendering of the message list.
//!
//! The terminal cannot redraw earlier lines, so [`Transcript`] remembers
//! what it has printed and turns each new [`SyncView`] into only the lines
//! that are new since the last one.

use std::collections::HashSet;

use chrono::{Local, TimeZone};

use parley_proto::conversation::Conversation;
use parley_proto::message::{ConversationId, MessageId, Role, Timestamp};

use crate::sync::{Entry, ProvisionalToken, SyncView};

/// Format an epoch-millisecond timestamp with a chrono format string.
#[must_use]
pub fn format_timestamp(ts: Timestamp, format: &str) -> String {
    let ms = ts.as_millis();
    let Ok(secs) = i64::try_from(ms / 1000) else {
        return "??:??".to_string();
    };
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format(format).to_string(),
        _ => "??:??".to_string(),
    }
}

const fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Ai => "ai",
    }
}

/// One display line for an entry. Pending entries are marked.
#[must_use]
pub fn format_entry(entry: &Entry, timestamp_format: &str) -> String {
    let time = format_timestamp(entry.created_at(), timestamp_format);
    let mark = if entry.is_provisional() { " (sending)" } else { "" };
    format!(
        "[{time}] {}: {}{mark}",
        speaker(entry.role()),
        entry.text()
    )
}

/// One line of the conversation listing.
#[must_use]
pub fn format_conversation(conversation: &Conversation, timestamp_format: &str) -> String {
    let title = conversation.title.as_deref().unwrap_or("(untitled)");
    let updated = format_timestamp(conversation.updated_at, timestamp_format);
    format!("#{:<5} {title}  [{updated}]", conversation.id.get())
}

/// Tracks what has been printed for the open conversation.
#[derive(Debug)]
pub struct Transcript {
    conversation: Option<ConversationId>,
    printed: HashSet<MessageId>,
    announced: HashSet<ProvisionalToken>,
    show_status: bool,
    timestamp_format: String,
}

impl Transcript {
    #[must_use]
    pub fn new(timestamp_format: impl Into<String>, show_status: bool) -> Self {
        Self {
            conversation: None,
            printed: HashSet::new(),
            announced: HashSet::new(),
            show_status,
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Lines to print for `view`, given everything printed so far.
    ///
    /// Confirmed messages are printed once each, in list order. Pending
    /// sends get a single "(sending)" line when `show_status` is on.
    pub fn render(&mut self, view: &SyncView) -> Vec<String> {
        let mut lines = Vec::new();
        if view.conversation != self.conversation {
            self.conversation = view.conversation;
            self.printed.clear();
            self.announced.clear();
            if let Some(id) = view.conversation {
                lines.push(format!("-- conversation #{id} --"));
            }
        }

        for entry in &view.entries {
            match entry {
                Entry::Confirmed(m) => {
                    if self.printed.insert(m.id) {
                        lines.push(format_entry(entry, &self.timestamp_format));
                    }
                }
                Entry::Provisional(p) => {
                    if self.show_status && self.announced.insert(p.token) {
                        lines.push(format_entry(entry, &self.timestamp_format));
                    }
                }
            }
        }
        lines
    }
}
