//! Sequence assignment for newly created messages.
//!
//! [`SequenceAssigner`] computes `next = max(sequence) + 1` for a
//! conversation and commits the new messages at that position. The read and
//! the commit are separate steps, so a concurrent writer can claim the slot
//! in between; the store's unique constraint rejects the loser, which then
//! re-reads and tries again, up to a bounded number of retries.

use parley_proto::message::{ConversationId, Message};

use crate::store::{MessageDraft, StoreError, TurnStore};

/// Default number of retries after a sequence conflict.
pub const DEFAULT_SEQUENCE_RETRIES: u32 = 5;

/// Assigns per-conversation sequences with bounded retry on conflict.
#[derive(Debug, Clone, Copy)]
pub struct SequenceAssigner {
    max_retries: u32,
}

impl Default for SequenceAssigner {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_RETRIES)
    }
}

impl SequenceAssigner {
    /// Creates an assigner that retries up to `max_retries` times after the
    /// first attempt.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Commits `drafts` at the next free consecutive sequences.
    ///
    /// Conflicts are retried silently; the caller only sees one when every
    /// attempt lost. Nothing is persisted unless the returned result is `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RetriesExhausted`] when all attempts conflicted,
    /// or any non-conflict store error unchanged.
    pub async fn commit<S: TurnStore>(
        &self,
        store: &S,
        conversation: ConversationId,
        drafts: &[MessageDraft],
        title_hint: Option<&str>,
    ) -> Result<Vec<Message>, StoreError> {
        let attempts = self.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let next = store.max_sequence(conversation).await?.next();
            match store
                .insert_turn(conversation, next, drafts, title_hint)
                .await
            {
                Ok(committed) => {
                    if attempt > 1 {
                        tracing::debug!(
                            conversation_id = %conversation,
                            sequence = %next,
                            attempt,
                            "sequence assigned after retry"
                        );
                    }
                    return Ok(committed);
                }
                Err(StoreError::SequenceConflict { sequence, .. }) => {
                    tracing::debug!(
                        conversation_id = %conversation,
                        sequence = %sequence,
                        attempt,
                        max_attempts = attempts,
                        "sequence conflict, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            conversation_id = %conversation,
            attempts,
            "sequence assignment retries exhausted"
        );
        Err(StoreError::RetriesExhausted {
            conversation,
            attempts,
        })
    }
}
