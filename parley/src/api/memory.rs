//! In-process [`ChatApi`] for testing.
//!
//! [`InMemoryApi`] keeps conversations and messages in memory with the same
//! sequencing rules as the server, and lets a test control timing: a held
//! [`Gate`] parks create responses (after the commit) or fetches (before the
//! read) until the test releases them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use parley_proto::conversation::{
    Conversation, ConversationPage, derive_title, normalize_title, validate_title,
};
use parley_proto::message::{
    ConversationId, Message, MessageId, Role, Sequence, Timestamp, validate_text,
};
use parley_proto::sync::{CreateMessageResponse, FetchSinceResponse};

use super::{ApiError, ChatApi};

/// Parks requests until released.
#[derive(Debug, Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Lets `count` parked or future requests through.
    pub fn release(&self, count: usize) {
        self.0.add_permits(count);
    }

    async fn pass(gate: Option<Self>) {
        if let Some(gate) = gate
            && let Ok(permit) = gate.0.acquire().await
        {
            permit.forget();
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_conversation: u64,
    next_message: u64,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

impl MemoryState {
    fn commit(&mut self, conversation: ConversationId, role: Role, text: &str) -> Message {
        let log = self.messages.entry(conversation).or_default();
        let sequence = log.last().map_or(Sequence::ZERO, |m| m.sequence).next();
        self.next_message += 1;
        let message = Message {
            id: MessageId::new(self.next_message),
            conversation,
            role,
            text: text.to_string(),
            sequence,
            created_at: Timestamp::now(),
        };
        log.push(message.clone());
        if let Some(conv) = self.conversations.get_mut(&conversation) {
            conv.updated_at = message.created_at;
        }
        message
    }

    /// Titles an untitled conversation after its first user message.
    fn apply_auto_title(&mut self, conversation: ConversationId, text: &str) {
        let has_user_turn = self
            .messages
            .get(&conversation)
            .is_some_and(|log| log.iter().any(|m| m.role == Role::User));
        if has_user_turn {
            return;
        }
        if let Some(conv) = self.conversations.get_mut(&conversation)
            && conv.title.is_none()
        {
            conv.title = normalize_title(Some(&derive_title(text)));
        }
    }
}

/// In-memory message log implementing [`ChatApi`].
#[derive(Debug, Default)]
pub struct InMemoryApi {
    state: Mutex<MemoryState>,
    create_gate: Mutex<Option<Gate>>,
    fetch_gate: Mutex<Option<Gate>>,
    fail_next_create: Mutex<Option<ApiError>>,
    fail_fetches: Mutex<Option<ApiError>>,
    fetch_calls: AtomicUsize,
}

impl InMemoryApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks every create response (after its commit) until released.
    pub fn hold_creates(&self) -> Gate {
        let gate = Gate::new();
        *self.create_gate.lock() = Some(gate.clone());
        gate
    }

    /// Parks every fetch (before it reads) until released.
    pub fn hold_fetches(&self) -> Gate {
        let gate = Gate::new();
        *self.fetch_gate.lock() = Some(gate.clone());
        gate
    }

    /// Makes the next create fail with `error` without committing anything.
    pub fn fail_next_create(&self, error: ApiError) {
        *self.fail_next_create.lock() = Some(error);
    }

    /// Makes every fetch fail with `error` (or succeed again with `None`).
    pub fn fail_fetches(&self, error: Option<ApiError>) {
        *self.fail_fetches.lock() = error;
    }

    /// Commits one message directly, as another client would.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown conversation.
    pub fn inject(
        &self,
        conversation: ConversationId,
        role: Role,
        text: &str,
    ) -> Result<Message, ApiError> {
        let mut state = self.state.lock();
        if !state.conversations.contains_key(&conversation) {
            return Err(not_found(conversation));
        }
        Ok(state.commit(conversation, role, text))
    }

    /// All committed messages of a conversation, in sequence order.
    #[must_use]
    pub fn messages(&self, conversation: ConversationId) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of fetches started so far.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

fn not_found(id: ConversationId) -> ApiError {
    ApiError::NotFound(format!("conversation {id} not found"))
}

impl ChatApi for InMemoryApi {
    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, ApiError> {
        let mut state = self.state.lock();
        state.next_conversation += 1;
        let now = Timestamp::now();
        let conversation = Conversation {
            id: ConversationId::new(state.next_conversation),
            title: normalize_title(title),
            created_at: now,
            updated_at: now,
        };
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<ConversationPage, ApiError> {
        let state = self.state.lock();
        let mut all: Vec<Conversation> = state.conversations.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        let count = all.len();
        let results = all.into_iter().skip(offset).take(limit).collect();
        Ok(ConversationPage {
            results,
            count,
            offset,
            limit,
        })
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        self.state
            .lock()
            .conversations
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let title = validate_title(title).map_err(|e| ApiError::Validation(e.to_string()))?;
        let mut state = self.state.lock();
        let conversation = state.conversations.get_mut(&id).ok_or_else(|| not_found(id))?;
        conversation.title = title;
        conversation.updated_at = Timestamp::now();
        Ok(conversation.clone())
    }

    async fn create_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<CreateMessageResponse, ApiError> {
        let text = validate_text(text).map_err(|e| ApiError::Validation(e.to_string()))?;
        if let Some(error) = self.fail_next_create.lock().take() {
            return Err(error);
        }

        let response = {
            let mut state = self.state.lock();
            if !state.conversations.contains_key(&conversation) {
                return Err(not_found(conversation));
            }
            state.apply_auto_title(conversation, text);
            let user_message = state.commit(conversation, Role::User, text);
            let ai_message = state.commit(conversation, Role::Ai, &format!("re: {text}"));
            CreateMessageResponse {
                user_message,
                ai_message,
            }
        };

        let gate = self.create_gate.lock().clone();
        Gate::pass(gate).await;
        Ok(response)
    }

    async fn fetch_since(
        &self,
        conversation: ConversationId,
        cursor: Sequence,
        limit: Option<usize>,
    ) -> Result<FetchSinceResponse, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().clone();
        Gate::pass(gate).await;

        if let Some(error) = self.fail_fetches.lock().clone() {
            return Err(error);
        }

        let state = self.state.lock();
        if !state.conversations.contains_key(&conversation) {
            return Err(not_found(conversation));
        }
        let results: Vec<Message> = state
            .messages
            .get(&conversation)
            .into_iter()
            .flatten()
            .filter(|m| m.sequence > cursor)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(FetchSinceResponse::from_batch(cursor, results))
    }
}
