//! Conversation and message operations.
//!
//! [`ChatService`] implements the server side of the synchronization
//! contract on top of a [`MessageLog`]:
//!
//! - `create_message` is all-or-nothing. The reply is generated before
//!   anything is written, and the user turn and AI reply are committed
//!   together by the [`SequenceAssigner`]. A generator failure leaves the
//!   log untouched, so a client retry cannot produce a duplicate-looking
//!   user turn.
//! - `fetch_since` returns the messages after a cursor in sequence order and
//!   never skips one inside the range it reports.

use parley_proto::conversation::{
    Conversation, ConversationPage, TitleError, derive_title, validate_title,
};
use parley_proto::message::{
    ConversationId, MAX_TEXT_CHARS, Role, Sequence, ValidationError, validate_text_with_limit,
};
use parley_proto::sync::{
    CreateMessageResponse, CursorError, DEFAULT_FETCH_LIMIT, FetchSinceResponse, MAX_FETCH_LIMIT,
};

use crate::generator::{GeneratorError, ReplyGenerator};
use crate::sequence::SequenceAssigner;
use crate::store::{MessageDraft, MessageLog, StoreError};

/// Errors returned by [`ChatService`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The message text was rejected.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The fetch cursor was rejected.
    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    /// The requested title was rejected.
    #[error("invalid title: {0}")]
    InvalidTitle(#[from] TitleError),

    /// The request path or body could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The conversation does not exist.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),

    /// The reply generator failed; nothing was persisted.
    #[error("{0}")]
    Dependency(#[from] GeneratorError),

    /// Concurrent writers kept winning the sequence race; nothing was persisted.
    #[error("could not assign a message sequence, try again")]
    SequenceExhausted,
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => Self::NotFound(id),
            StoreError::SequenceConflict { .. } | StoreError::RetriesExhausted { .. } => {
                Self::SequenceExhausted
            }
        }
    }
}

/// Tunable limits for message operations.
#[derive(Debug, Clone)]
pub struct MessageLimits {
    /// Maximum message length in characters after trimming.
    pub max_text_chars: usize,
    /// Page size used when a fetch does not ask for one.
    pub fetch_default_limit: usize,
    /// Largest page size a fetch may ask for.
    pub fetch_max_limit: usize,
    /// Number of previous messages handed to the reply generator.
    pub history_window: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_text_chars: MAX_TEXT_CHARS,
            fetch_default_limit: DEFAULT_FETCH_LIMIT,
            fetch_max_limit: MAX_FETCH_LIMIT,
            history_window: 10,
        }
    }
}

/// Server-side conversation and message operations.
pub struct ChatService<G: ReplyGenerator> {
    log: MessageLog,
    assigner: SequenceAssigner,
    generator: G,
    limits: MessageLimits,
}

impl<G: ReplyGenerator> ChatService<G> {
    /// Creates a service with an empty log and default limits.
    pub fn new(generator: G) -> Self {
        Self::with_config(generator, MessageLimits::default(), SequenceAssigner::default())
    }

    /// Creates a service with explicit limits and retry policy.
    pub fn with_config(generator: G, limits: MessageLimits, assigner: SequenceAssigner) -> Self {
        Self {
            log: MessageLog::new(),
            assigner,
            generator,
            limits,
        }
    }

    /// Read access to the underlying log.
    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Active limits.
    #[must_use]
    pub const fn limits(&self) -> &MessageLimits {
        &self.limits
    }

    /// Creates a conversation.
    pub async fn create_conversation(&self, title: Option<&str>) -> Conversation {
        let conversation = self.log.create_conversation(title).await;
        tracing::info!(conversation_id = %conversation.id, "conversation created");
        conversation
    }

    /// Lists conversations, most recently updated first.
    pub async fn list_conversations(&self, limit: usize, offset: usize) -> ConversationPage {
        let (results, count) = self.log.list_conversations(limit, offset).await;
        ConversationPage {
            results,
            count,
            offset,
            limit,
        }
    }

    /// Returns one conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] if it does not exist.
    pub async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ServiceError> {
        Ok(self.log.get_conversation(id).await?)
    }

    /// Sets or clears a conversation's title.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidTitle`] for a title over the length limit
    /// - [`ServiceError::NotFound`] for an unknown conversation
    pub async fn update_conversation(
        &self,
        id: ConversationId,
        title: Option<&str>,
    ) -> Result<Conversation, ServiceError> {
        let title = validate_title(title)?;
        let conversation = self.log.set_title(id, title).await?;
        tracing::info!(conversation_id = %id, "conversation title updated");
        Ok(conversation)
    }

    /// Commits a user turn and its AI reply, or nothing.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] for empty or over-long text
    /// - [`ServiceError::NotFound`] for an unknown conversation
    /// - [`ServiceError::Dependency`] when the generator fails
    /// - [`ServiceError::SequenceExhausted`] when sequence retries run out
    pub async fn create_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<CreateMessageResponse, ServiceError> {
        let text = validate_text_with_limit(text, self.limits.max_text_chars)?;
        let history = self
            .log
            .recent(conversation, self.limits.history_window)
            .await?;

        let reply = match self.generator.generate(&history, text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation,
                    error = %e,
                    "reply generation failed, nothing committed"
                );
                return Err(e.into());
            }
        };

        let drafts = [
            MessageDraft::new(Role::User, text),
            MessageDraft::new(Role::Ai, reply),
        ];
        let title = derive_title(text);
        let mut committed = self
            .assigner
            .commit(&self.log, conversation, &drafts, Some(&title))
            .await?
            .into_iter();

        let (Some(user_message), Some(ai_message)) = (committed.next(), committed.next()) else {
            unreachable!("insert_turn commits exactly one message per draft");
        };

        tracing::info!(
            conversation_id = %conversation,
            user_sequence = %user_message.sequence,
            ai_sequence = %ai_message.sequence,
            "turn committed"
        );

        Ok(CreateMessageResponse {
            user_message,
            ai_message,
        })
    }

    /// Returns messages after `cursor`, ascending, at most `limit` of them
    /// (the configured default when `None`, clamped to the configured max).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for an unknown conversation.
    pub async fn fetch_since(
        &self,
        conversation: ConversationId,
        cursor: Sequence,
        limit: Option<usize>,
    ) -> Result<FetchSinceResponse, ServiceError> {
        let limit = limit
            .unwrap_or(self.limits.fetch_default_limit)
            .clamp(1, self.limits.fetch_max_limit.max(1));
        let results = self.log.messages_since(conversation, cursor, limit).await?;
        tracing::debug!(
            conversation_id = %conversation,
            cursor = %cursor,
            count = results.len(),
            "fetch since"
        );
        Ok(FetchSinceResponse::from_batch(cursor, results))
    }
}
