//! Optimistic sends.
//!
//! A send happens in two halves. [`OptimisticMessageController::submit`]
//! validates the text and shows a pending entry immediately, without
//! touching the network. [`OptimisticMessageController::deliver`] then
//! issues the create request and hands the outcome to
//! [`reconcile`](super::reconcile), whichever order it arrives in relative
//! to the poller.

use std::sync::Arc;

use parley_proto::message::{MAX_TEXT_CHARS, Message, Role, validate_text_with_limit};

use crate::api::ChatApi;

use super::context::{ProvisionalToken, SyncTicket};
use super::reconcile::{self, FailOutcome};
use super::{SendError, SharedSync};

/// A submitted send whose create request has not been issued yet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a submitted send does nothing until it is delivered"]
pub struct PendingSend {
    /// Token of the pending entry.
    pub token: ProvisionalToken,
    /// Session the send was submitted under.
    pub ticket: SyncTicket,
    /// Validated text.
    pub text: String,
}

/// How a delivered send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server stored the turn and it was merged into the list.
    Delivered {
        /// The stored user message.
        user: Message,
        /// The AI reply.
        ai: Message,
    },
    /// The server stored the turn, but the user had switched conversations
    /// before the response arrived.
    Discarded,
}

/// Creates provisional entries and resolves them from create responses.
pub struct OptimisticMessageController<A: ChatApi> {
    api: Arc<A>,
    sync: SharedSync,
    max_text_chars: usize,
}

impl<A: ChatApi> Clone for OptimisticMessageController<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            sync: self.sync.clone(),
            max_text_chars: self.max_text_chars,
        }
    }
}

impl<A: ChatApi> OptimisticMessageController<A> {
    /// Creates a controller with the default text limit.
    pub fn new(api: Arc<A>, sync: SharedSync) -> Self {
        Self::with_limit(api, sync, MAX_TEXT_CHARS)
    }

    /// Creates a controller that rejects text longer than `max_text_chars`.
    pub fn with_limit(api: Arc<A>, sync: SharedSync, max_text_chars: usize) -> Self {
        Self {
            api,
            sync,
            max_text_chars,
        }
    }

    /// Validates `text` and appends a pending entry to the open conversation.
    ///
    /// # Errors
    ///
    /// - [`SendError::Validation`] for empty or over-long text
    /// - [`SendError::NoConversation`] when no conversation is open
    ///
    /// Neither error changes any state.
    pub fn submit(&self, text: &str) -> Result<PendingSend, SendError> {
        let text = validate_text_with_limit(text, self.max_text_chars)?.to_string();
        let ticket = self
            .sync
            .read(|ctx| ctx.ticket())
            .ok_or(SendError::NoConversation)?;

        let token = ProvisionalToken::new();
        let inserted = self.sync.update(|ctx| {
            reconcile::insert_provisional(ctx, &ticket, token, Role::User, text.clone())
        });
        if !inserted {
            // The conversation changed between the two lock scopes.
            return Err(SendError::NoConversation);
        }

        tracing::debug!(
            conversation_id = %ticket.conversation,
            token = %token,
            "provisional message added"
        );
        Ok(PendingSend {
            token,
            ticket,
            text,
        })
    }

    /// Issues the create request for `pending` and merges the result.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Api`] when the request fails. The pending entry
    /// has been removed by then, unless a poll already confirmed it.
    pub async fn deliver(&self, pending: PendingSend) -> Result<SendOutcome, SendError> {
        let PendingSend {
            token,
            ticket,
            text,
        } = pending;

        match self.api.create_message(ticket.conversation, &text).await {
            Ok(response) => {
                let user = response.user_message;
                let ai = response.ai_message;
                let report = self.sync.update(|ctx| {
                    reconcile::resolve_send(ctx, &ticket, token, user.clone(), ai.clone())
                });
                if report.stale {
                    tracing::info!(
                        conversation_id = %ticket.conversation,
                        sequence = %user.sequence,
                        "send completed after conversation switch, result discarded"
                    );
                    return Ok(SendOutcome::Discarded);
                }
                tracing::debug!(
                    conversation_id = %ticket.conversation,
                    user_sequence = %user.sequence,
                    ai_sequence = %ai.sequence,
                    resolved = report.resolved,
                    duplicates = report.duplicates,
                    cursor = %report.cursor,
                    "send confirmed"
                );
                Ok(SendOutcome::Delivered { user, ai })
            }
            Err(e) => {
                let outcome = self
                    .sync
                    .update(|ctx| reconcile::fail_send(ctx, &ticket, token));
                tracing::warn!(
                    conversation_id = %ticket.conversation,
                    token = %token,
                    outcome = ?outcome,
                    error = %e,
                    "send failed"
                );
                if outcome == FailOutcome::Kept {
                    tracing::warn!(
                        token = %token,
                        "send reported failure after a poll confirmed it"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// [`submit`](Self::submit) followed by [`deliver`](Self::deliver).
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit) and [`deliver`](Self::deliver).
    pub async fn send(&self, text: &str) -> Result<SendOutcome, SendError> {
        let pending = self.submit(text)?;
        self.deliver(pending).await
    }
}
