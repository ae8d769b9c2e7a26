//! Message types for the Parley wire format.
//!
//! A [`Message`] is the server-authoritative record of one turn in a
//! conversation. Its [`Sequence`] is assigned exactly once, when the message
//! is committed, and is strictly increasing within the conversation.

use serde::{Deserialize, Serialize};

/// Maximum allowed message length, in characters, after trimming.
pub const MAX_TEXT_CHARS: usize = 1000;

/// Server-assigned identifier of a message. Unique across all conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates a `MessageId` from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u64);

impl ConversationId {
    /// Creates a `ConversationId` from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConversationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Position of a message within its conversation.
///
/// Sequence `0` is never assigned to a message; it doubles as the
/// "from the beginning" cursor value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    /// The cursor value meaning "nothing incorporated yet".
    pub const ZERO: Self = Self(0);

    /// Creates a sequence from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the sequence immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the sequence `offset` positions after this one.
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.saturating_add(offset))
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human participant.
    User,
    /// The AI responder.
    Ai,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed, server-persisted message.
///
/// Once committed, no field of a `Message` ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique server-assigned identifier.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation: ConversationId,
    /// Author of the turn.
    pub role: Role,
    /// Trimmed message text.
    pub text: String,
    /// Position within the conversation.
    pub sequence: Sequence,
    /// When the message was committed.
    pub created_at: Timestamp,
}

/// Error returned when message text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message text is empty after trimming.
    #[error("message text is empty")]
    Empty,
    /// Message text exceeds the maximum allowed length.
    #[error("message too long ({len} characters, max {max})")]
    TooLong {
        /// Length of the trimmed text in characters.
        len: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Validates message text against [`MAX_TEXT_CHARS`], returning the trimmed text.
///
/// # Errors
///
/// See [`validate_text_with_limit`].
pub fn validate_text(text: &str) -> Result<&str, ValidationError> {
    validate_text_with_limit(text, MAX_TEXT_CHARS)
}

/// Validates message text, returning the trimmed slice that would be stored.
///
/// Leading and trailing whitespace is not part of the message; the length
/// bound is counted in characters, not bytes.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] if nothing remains after trimming, or
/// [`ValidationError::TooLong`] if the trimmed text is longer than `max_chars`.
pub fn validate_text_with_limit(text: &str, max_chars: usize) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(ValidationError::TooLong {
            len,
            max: max_chars,
        });
    }
    Ok(trimmed)
}
