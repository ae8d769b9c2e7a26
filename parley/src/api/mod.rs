//! Client access to the message log server.
//!
//! Defines the [`ChatApi`] trait that the sync core talks to, so the same
//! session logic runs against the real HTTP server or an in-process log.
//!
//! Implementations:
//! - [`http::HttpChatApi`]: reqwest client for the server's JSON API
//! - [`memory::InMemoryApi`]: in-process log for tests, with hooks to hold
//!   or fail requests

pub mod http;
pub mod memory;

use parley_proto::conversation::{Conversation, ConversationPage};
use parley_proto::message::{ConversationId, Sequence};
use parley_proto::sync::{CreateMessageResponse, FetchSinceResponse};

/// Errors returned by a [`ChatApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never got an HTTP response (connect failure, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request as invalid (400).
    #[error("rejected by server: {0}")]
    Validation(String),

    /// The conversation does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The server's reply generator failed; nothing was stored (502).
    #[error("reply generation failed: {0}")]
    Dependency(String),

    /// Any other non-success status.
    #[error("server error {status}: {detail}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error detail from the response body.
        detail: String,
    },

    /// The request body could not be encoded.
    #[error("invalid request body: {0}")]
    Encode(String),

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The configured server URL is unusable.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Maps a non-success HTTP status and its error detail to an error.
    #[must_use]
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            400 => Self::Validation(detail),
            404 => Self::NotFound(detail),
            502 => Self::Dependency(detail),
            _ => Self::Server { status, detail },
        }
    }
}

/// Operations the client needs from the message log server.
pub trait ChatApi: Send + Sync + 'static {
    /// Creates a conversation, optionally titled.
    fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Conversation, ApiError>> + Send;

    /// Lists conversations, most recently updated first.
    fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> impl std::future::Future<Output = Result<ConversationPage, ApiError>> + Send;

    /// Fetches one conversation.
    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> impl std::future::Future<Output = Result<Conversation, ApiError>> + Send;

    /// Sets a conversation's title; `None` or a blank title clears it.
    fn update_conversation(
        &self,
        id: ConversationId,
        title: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Conversation, ApiError>> + Send;

    /// Creates a user message and returns it with the AI reply.
    fn create_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<CreateMessageResponse, ApiError>> + Send;

    /// Fetches messages with a sequence above `cursor`.
    fn fetch_since(
        &self,
        conversation: ConversationId,
        cursor: Sequence,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<FetchSinceResponse, ApiError>> + Send;
}
