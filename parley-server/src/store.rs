//! In-memory conversation and message log.
//!
//! The [`MessageLog`] keeps one ordered log per conversation. Each log sits
//! behind its own lock, so writers to different conversations never contend.
//! Sequence values are protected by a unique constraint checked inside that
//! lock: [`TurnStore::insert_turn`] refuses any sequence that is already
//! taken or not beyond the current maximum, and the caller is expected to
//! re-read and retry (see [`crate::sequence::SequenceAssigner`]).

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};

use parley_proto::conversation::{Conversation, normalize_title};
use parley_proto::message::{ConversationId, Message, MessageId, Role, Sequence, Timestamp};

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The conversation does not exist.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// The requested sequence collides with an existing message.
    #[error("sequence {sequence} already taken in conversation {conversation}")]
    SequenceConflict {
        /// Conversation the insert targeted.
        conversation: ConversationId,
        /// First sequence of the rejected insert.
        sequence: Sequence,
    },

    /// Every sequence assignment attempt conflicted with a concurrent writer.
    #[error("gave up assigning a sequence in conversation {conversation} after {attempts} attempts")]
    RetriesExhausted {
        /// Conversation the insert targeted.
        conversation: ConversationId,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// A message that has not been assigned an id or sequence yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Author of the turn.
    pub role: Role,
    /// Already-validated text.
    pub text: String,
}

impl MessageDraft {
    /// Creates a draft for the given role and text.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Storage seam used by the sequence assigner.
///
/// Implementations include:
/// - [`MessageLog`]: the in-process log used by the server
/// - contended wrappers in tests that inject concurrent writers
pub trait TurnStore: Send + Sync {
    /// Returns the highest sequence committed in the conversation, or
    /// [`Sequence::ZERO`] if it has no messages.
    fn max_sequence(
        &self,
        conversation: ConversationId,
    ) -> impl std::future::Future<Output = Result<Sequence, StoreError>> + Send;

    /// Commits `drafts` atomically at consecutive sequences starting at `first`.
    ///
    /// Either every draft is persisted or none is. `title_hint` becomes the
    /// conversation title if the conversation is untitled and has no user
    /// message yet.
    fn insert_turn(
        &self,
        conversation: ConversationId,
        first: Sequence,
        drafts: &[MessageDraft],
        title_hint: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;
}

/// One conversation and its ordered messages.
#[derive(Debug)]
struct ConversationLog {
    conversation: Conversation,
    messages: BTreeMap<Sequence, Message>,
}

impl ConversationLog {
    fn max_sequence(&self) -> Sequence {
        self.messages
            .last_key_value()
            .map_or(Sequence::ZERO, |(seq, _)| *seq)
    }

    fn has_user_message(&self) -> bool {
        self.messages.values().any(|m| m.role == Role::User)
    }
}

/// In-memory, per-conversation ordered message log.
///
/// Thread-safe: the conversation directory is behind an [`RwLock`] and each
/// conversation's log behind its own [`Mutex`].
pub struct MessageLog {
    conversations: RwLock<HashMap<ConversationId, Arc<Mutex<ConversationLog>>>>,
    next_conversation_id: AtomicU64,
    next_message_id: AtomicU64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            next_conversation_id: AtomicU64::new(1),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Creates a new conversation with an optional title.
    pub async fn create_conversation(&self, title: Option<&str>) -> Conversation {
        let id = ConversationId::new(self.next_conversation_id.fetch_add(1, Ordering::Relaxed));
        let now = Timestamp::now();
        let conversation = Conversation {
            id,
            title: normalize_title(title),
            created_at: now,
            updated_at: now,
        };
        let log = ConversationLog {
            conversation: conversation.clone(),
            messages: BTreeMap::new(),
        };
        self.conversations
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(log)));
        conversation
    }

    /// Returns a conversation record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if it does not exist.
    pub async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        let log = self.log(id).await?;
        let conversation = log.lock().await.conversation.clone();
        Ok(conversation)
    }

    /// Replaces a conversation's title and bumps its `updated_at`. Messages
    /// and sequences are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if it does not exist.
    pub async fn set_title(
        &self,
        id: ConversationId,
        title: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let log = self.log(id).await?;
        let mut guard = log.lock().await;
        guard.conversation.title = title;
        guard.conversation.updated_at = Timestamp::now();
        Ok(guard.conversation.clone())
    }

    /// Returns one page of conversations, most recently updated first, along
    /// with the total count.
    pub async fn list_conversations(&self, limit: usize, offset: usize) -> (Vec<Conversation>, usize) {
        let logs: Vec<_> = self.conversations.read().await.values().cloned().collect();
        let mut all = Vec::with_capacity(logs.len());
        for log in logs {
            all.push(log.lock().await.conversation.clone());
        }
        all.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let count = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, count)
    }

    /// Returns up to `limit` messages with a sequence strictly greater than
    /// `cursor`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if it does not exist.
    pub async fn messages_since(
        &self,
        id: ConversationId,
        cursor: Sequence,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let log = self.log(id).await?;
        let guard = log.lock().await;
        Ok(guard
            .messages
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    /// Returns the last `count` messages of a conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if it does not exist.
    pub async fn recent(&self, id: ConversationId, count: usize) -> Result<Vec<Message>, StoreError> {
        let log = self.log(id).await?;
        let guard = log.lock().await;
        let mut recent: Vec<Message> = guard.messages.values().rev().take(count).cloned().collect();
        drop(guard);
        recent.reverse();
        Ok(recent)
    }

    /// Returns the number of messages in a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConversationNotFound`] if it does not exist.
    pub async fn message_count(&self, id: ConversationId) -> Result<usize, StoreError> {
        let log = self.log(id).await?;
        let len = log.lock().await.messages.len();
        Ok(len)
    }

    async fn log(&self, id: ConversationId) -> Result<Arc<Mutex<ConversationLog>>, StoreError> {
        self.conversations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(id))
    }
}

impl TurnStore for MessageLog {
    async fn max_sequence(&self, conversation: ConversationId) -> Result<Sequence, StoreError> {
        let log = self.log(conversation).await?;
        let max = log.lock().await.max_sequence();
        Ok(max)
    }

    async fn insert_turn(
        &self,
        conversation: ConversationId,
        first: Sequence,
        drafts: &[MessageDraft],
        title_hint: Option<&str>,
    ) -> Result<Vec<Message>, StoreError> {
        let log = self.log(conversation).await?;
        let mut guard = log.lock().await;

        // Unique (conversation, sequence): the whole range must be free and
        // strictly after everything already committed.
        let taken = first <= guard.max_sequence()
            || (0..drafts.len() as u64).any(|i| guard.messages.contains_key(&first.offset(i)));
        if first == Sequence::ZERO || taken {
            return Err(StoreError::SequenceConflict {
                conversation,
                sequence: first,
            });
        }

        let first_user_turn = !guard.has_user_message() && drafts.iter().any(|d| d.role == Role::User);
        let now = Timestamp::now();
        let mut committed = Vec::with_capacity(drafts.len());
        for (sequence, draft) in (0u64..).map(|i| first.offset(i)).zip(drafts) {
            let message = Message {
                id: MessageId::new(self.next_message_id.fetch_add(1, Ordering::Relaxed)),
                conversation,
                role: draft.role,
                text: draft.text.clone(),
                sequence,
                created_at: now,
            };
            guard.messages.insert(sequence, message.clone());
            committed.push(message);
        }

        guard.conversation.updated_at = now;
        if guard.conversation.title.is_none()
            && first_user_turn
            && let Some(title) = title_hint
        {
            guard.conversation.title = normalize_title(Some(title));
        }
        drop(guard);

        Ok(committed)
    }
}
