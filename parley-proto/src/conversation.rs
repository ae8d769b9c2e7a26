//! Conversation records and paging bodies.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Timestamp};

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Number of characters of the first user message used as an automatic title.
pub const AUTO_TITLE_CHARS: usize = 50;

/// A named container for an ordered message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-assigned identifier.
    pub id: ConversationId,
    /// Optional display title.
    pub title: Option<String>,
    /// When the conversation was created.
    pub created_at: Timestamp,
    /// When a message was last committed (or the conversation created).
    pub updated_at: Timestamp,
}

/// Body of a create-conversation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional initial title. Blank titles are stored as no title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of an update-conversation request.
///
/// A missing, null, or blank title clears the title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConversationRequest {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Error returned when a requested title is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    /// Title exceeds the maximum length after trimming.
    #[error("title is too long: {len} characters (max {max})")]
    TooLong {
        /// Length of the trimmed title in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// One page of the conversation listing, most recently updated first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPage {
    /// Conversations on this page.
    pub results: Vec<Conversation>,
    /// Total number of conversations.
    pub count: usize,
    /// Offset of the first result.
    pub offset: usize,
    /// Page size that was applied.
    pub limit: usize,
}

/// Normalizes a requested title: trims it, treats blank as absent, and
/// truncates to [`MAX_TITLE_CHARS`].
#[must_use]
pub fn normalize_title(title: Option<&str>) -> Option<String> {
    let trimmed = title?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}

/// Validates an explicitly requested title: trims it and treats blank as
/// absent, like [`normalize_title`], but rejects rather than truncates a
/// title longer than [`MAX_TITLE_CHARS`].
///
/// # Errors
///
/// Returns [`TitleError::TooLong`] for an over-long title.
pub fn validate_title(title: Option<&str>) -> Result<Option<String>, TitleError> {
    let Some(trimmed) = title.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let len = trimmed.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(TitleError::TooLong {
            len,
            max: MAX_TITLE_CHARS,
        });
    }
    Ok(Some(trimmed.to_string()))
}

/// Derives a title from the first user message of a conversation.
///
/// Uses the first [`AUTO_TITLE_CHARS`] characters, trimmed, and appends
/// `...` when the message was longer.
#[must_use]
pub fn derive_title(first_message: &str) -> String {
    let mut title: String = first_message.chars().take(AUTO_TITLE_CHARS).collect();
    let truncated = first_message.chars().count() > AUTO_TITLE_CHARS;
    title = title.trim().to_string();
    if truncated {
        title.push_str("...");
    }
    title
}
