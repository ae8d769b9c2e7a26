//! Chat session orchestration.
//!
//! [`ChatSession`] ties one API client to one shared sync context, the
//! optimistic send controller, and the poll scheduler. Front ends talk only
//! to the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use parley_proto::conversation::{Conversation, ConversationPage};
use parley_proto::message::{ConversationId, MAX_TEXT_CHARS};
use parley_proto::sync::DEFAULT_FETCH_LIMIT;

use crate::api::{ApiError, ChatApi};
use crate::sync::poller::DEFAULT_POLL_INTERVAL;
use crate::sync::{
    OptimisticMessageController, PendingSend, PollOutcome, PollScheduler, ProvisionalToken,
    SendError, SendOutcome, SharedSync, SyncView,
};

/// Tunables for a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Time between polls of the open conversation.
    pub poll_interval: Duration,
    /// Messages requested per poll.
    pub fetch_limit: usize,
    /// Local text limit, matching the server's.
    pub max_text_chars: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            max_text_chars: MAX_TEXT_CHARS,
        }
    }
}

/// A submitted send, already visible as a pending entry.
///
/// Dropping it without calling [`deliver`](Self::deliver) leaves the
/// entry pending until the conversation is switched.
#[must_use = "the message is not sent until the handle is delivered"]
pub struct SendHandle<A: ChatApi> {
    controller: OptimisticMessageController<A>,
    pending: PendingSend,
}

impl<A: ChatApi> SendHandle<A> {
    /// Token of the pending entry.
    pub const fn token(&self) -> ProvisionalToken {
        self.pending.token
    }

    /// Issues the create request and merges the result.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Api`] when the request fails.
    pub async fn deliver(self) -> Result<SendOutcome, SendError> {
        self.controller.deliver(self.pending).await
    }
}

/// One user's view of the chat service.
pub struct ChatSession<A: ChatApi> {
    api: Arc<A>,
    sync: SharedSync,
    controller: OptimisticMessageController<A>,
    poller: PollScheduler<A>,
}

impl<A: ChatApi> ChatSession<A> {
    /// Creates a session with no open conversation.
    pub fn new(api: A, settings: &SessionSettings) -> Self {
        Self::with_shared(Arc::new(api), settings)
    }

    /// Creates a session over an API client shared with other code.
    pub fn with_shared(api: Arc<A>, settings: &SessionSettings) -> Self {
        let sync = SharedSync::new();
        let controller = OptimisticMessageController::with_limit(
            Arc::clone(&api),
            sync.clone(),
            settings.max_text_chars,
        );
        let poller = PollScheduler::new(Arc::clone(&api), sync.clone(), settings.poll_interval)
            .with_fetch_limit(settings.fetch_limit);
        Self {
            api,
            sync,
            controller,
            poller,
        }
    }

    /// Opens an existing conversation and starts polling it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown conversation; the
    /// previously open conversation stays open in that case.
    pub async fn open_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        let conversation = self.api.get_conversation(id).await?;
        self.poller.switch_to(conversation.id);
        Ok(conversation)
    }

    /// Creates a conversation and opens it.
    ///
    /// # Errors
    ///
    /// Returns the API error if the conversation cannot be created.
    pub async fn start_conversation(&self, title: Option<&str>) -> Result<Conversation, ApiError> {
        let conversation = self.api.create_conversation(title).await?;
        tracing::info!(conversation_id = %conversation.id, "conversation created");
        self.poller.switch_to(conversation.id);
        Ok(conversation)
    }

    /// Lists conversations, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns the API error if the listing fails.
    pub async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<ConversationPage, ApiError> {
        self.api.list_conversations(limit, offset).await
    }

    /// Sets or clears the open conversation's title.
    ///
    /// Returns `Ok(None)` when no conversation is open. The message list is
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] for an over-long title.
    pub async fn rename_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Option<Conversation>, ApiError> {
        let Some(id) = self.active_conversation() else {
            return Ok(None);
        };
        let conversation = self.api.update_conversation(id, title).await?;
        tracing::info!(conversation_id = %id, "conversation renamed");
        Ok(Some(conversation))
    }

    /// Shows `text` as a pending entry and returns a handle that sends it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] or [`SendError::NoConversation`];
    /// nothing changes in either case.
    pub fn submit(&self, text: &str) -> Result<SendHandle<A>, SendError> {
        let pending = self.controller.submit(text)?;
        Ok(SendHandle {
            controller: self.controller.clone(),
            pending,
        })
    }

    /// Submits and delivers `text`.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit) and [`SendHandle::deliver`].
    pub async fn send(&self, text: &str) -> Result<SendOutcome, SendError> {
        self.controller.send(text).await
    }

    /// Polls the open conversation now.
    pub async fn refresh(&self) -> PollOutcome {
        self.poller.poll_once().await
    }

    /// Owned copy of the current list and cursor.
    #[must_use]
    pub fn snapshot(&self) -> SyncView {
        self.sync.snapshot()
    }

    /// Receiver that sees a new version after every change to the list.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sync.subscribe()
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.poller.conversation()
    }

    /// Stops polling and closes the open conversation.
    pub fn close(&self) {
        self.poller.stop();
    }
}
