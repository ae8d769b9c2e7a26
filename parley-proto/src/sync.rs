//! Request and response bodies for the two synchronization operations.
//!
//! - `CreateMessage(conversation, text)` commits a user turn together with
//!   its AI reply, or nothing at all.
//! - `FetchSince(conversation, cursor)` returns every message with a
//!   sequence strictly greater than the cursor, ascending.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Sequence};

/// Default number of messages returned by one fetch.
pub const DEFAULT_FETCH_LIMIT: usize = 50;

/// Upper bound on the number of messages returned by one fetch.
pub const MAX_FETCH_LIMIT: usize = 200;

/// Body of a create-message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    /// Raw user text; the server trims it before storing.
    pub text: String,
}

/// Both turns committed by a successful create-message call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessageResponse {
    /// The committed user turn.
    pub user_message: Message,
    /// The committed AI reply, sequenced directly after the user turn.
    pub ai_message: Message,
}

/// Result of an incremental fetch.
///
/// `last_seq` is the sequence of the last message in `results`, or the
/// request cursor when `results` is empty. Every message with a sequence in
/// `(cursor, last_seq]` is included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSinceResponse {
    /// New messages, ascending by sequence.
    pub results: Vec<Message>,
    /// Highest sequence covered by this response.
    #[serde(rename = "lastSeq")]
    pub last_seq: Sequence,
}

impl FetchSinceResponse {
    /// Builds a response from an ascending batch fetched after `cursor`.
    #[must_use]
    pub fn from_batch(cursor: Sequence, results: Vec<Message>) -> Self {
        let last_seq = results.last().map_or(cursor, |m| m.sequence);
        Self { results, last_seq }
    }
}

/// JSON error body returned by the server for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description of the failure.
    pub detail: String,
}

/// Error returned when a `since` cursor cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// The cursor was a negative integer.
    #[error("cursor must be >= 0, got {0}")]
    Negative(i128),
    /// The cursor was not an integer.
    #[error("cursor is not an integer: {0:?}")]
    NotANumber(String),
}

/// Parses the `since` query value. A missing value means "from the beginning".
///
/// # Errors
///
/// Returns [`CursorError::Negative`] for negative integers and
/// [`CursorError::NotANumber`] for anything that is not an integer.
pub fn parse_cursor(raw: Option<&str>) -> Result<Sequence, CursorError> {
    let Some(raw) = raw else {
        return Ok(Sequence::ZERO);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Sequence::ZERO);
    }
    let value: i128 = trimmed
        .parse()
        .map_err(|_| CursorError::NotANumber(raw.to_string()))?;
    if value < 0 {
        return Err(CursorError::Negative(value));
    }
    u64::try_from(value)
        .map(Sequence::new)
        .map_err(|_| CursorError::NotANumber(raw.to_string()))
}

/// Parses an integer query parameter, falling back to `default` when it is
/// missing or malformed and clamping the result to `[min, max]`.
#[must_use]
pub fn parse_clamped(raw: Option<&str>, default: usize, min: usize, max: usize) -> usize {
    let parsed = raw
        .and_then(|r| r.trim().parse::<i128>().ok())
        .unwrap_or_else(|| i128::try_from(default).unwrap_or(i128::MAX));
    let clamped = parsed.clamp(
        i128::try_from(min).unwrap_or(0),
        i128::try_from(max).unwrap_or(i128::MAX),
    );
    usize::try_from(clamped).unwrap_or(default)
}
