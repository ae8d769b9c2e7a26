//! Client-side synchronization state for the open conversation.
//!
//! A [`SyncContext`] holds everything the client knows about one
//! conversation: the ordered entry list, the cursor, and the ledger of
//! provisional sends. It is plain data; the functions in
//! [`reconcile`](super::reconcile) are the only code that mutates it.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use parley_proto::message::{ConversationId, Message, MessageId, Role, Sequence, Timestamp};

/// Client-local identity of a provisional send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisionalToken(Uuid);

impl ProvisionalToken {
    /// Generate a fresh token (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ProvisionalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProvisionalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a provisional send is in its lifecycle.
///
/// `Pending` is the only non-terminal state. `Confirmed` and `Superseded`
/// look the same to the user; they record which path resolved the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionalStatus {
    /// Waiting for the create response or a poll to confirm it.
    Pending,
    /// Resolved by its own create response.
    Confirmed(MessageId),
    /// Resolved by a poll before its create response arrived.
    Superseded(MessageId),
    /// The create request failed and the entry was removed.
    Failed,
}

impl ProvisionalStatus {
    /// Whether the send is still waiting for confirmation.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A locally created placeholder for a message the server has not confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalEntry {
    /// Client-local identity.
    pub token: ProvisionalToken,
    /// Always [`Role::User`] for sends from this client.
    pub role: Role,
    /// Validated, trimmed text.
    pub text: String,
    /// When the user submitted it.
    pub created_at: Timestamp,
}

/// Identity of an entry in the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// Not yet confirmed by the server.
    Provisional {
        /// Client-local token.
        token: ProvisionalToken,
    },
    /// Server-assigned identity.
    Confirmed {
        /// Server message id.
        id: MessageId,
        /// Position in the conversation.
        sequence: Sequence,
    },
}

/// One row of the local message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A server-confirmed message.
    Confirmed(Message),
    /// A send still waiting for confirmation.
    Provisional(ProvisionalEntry),
}

impl Entry {
    /// Identity of this entry.
    #[must_use]
    pub const fn id(&self) -> EntryId {
        match self {
            Self::Confirmed(m) => EntryId::Confirmed {
                id: m.id,
                sequence: m.sequence,
            },
            Self::Provisional(p) => EntryId::Provisional { token: p.token },
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Confirmed(m) => m.role,
            Self::Provisional(p) => p.role,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.text,
            Self::Provisional(p) => &p.text,
        }
    }

    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        match self {
            Self::Confirmed(m) => m.created_at,
            Self::Provisional(p) => p.created_at,
        }
    }

    /// Server sequence, if confirmed.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::Confirmed(m) => Some(m.sequence),
            Self::Provisional(_) => None,
        }
    }

    /// Server message id, if confirmed.
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Confirmed(m) => Some(m.id),
            Self::Provisional(_) => None,
        }
    }

    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

/// Identifies the conversation session a request was issued under.
///
/// Captured when a request starts and checked when its result arrives; a
/// result whose ticket no longer matches is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket {
    /// Conversation the request targets.
    pub conversation: ConversationId,
    epoch: u64,
}

/// Synchronization state of the open conversation.
#[derive(Debug, Default)]
pub struct SyncContext {
    pub(super) conversation: Option<ConversationId>,
    pub(super) epoch: u64,
    pub(super) entries: Vec<Entry>,
    pub(super) cursor: Sequence,
    pub(super) ledger: HashMap<ProvisionalToken, ProvisionalStatus>,
}

impl SyncContext {
    /// Creates a context with no open conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to `conversation` (or none), clearing the list, the cursor,
    /// and the ledger. Any ticket issued before the reset becomes stale.
    pub fn reset(&mut self, conversation: Option<ConversationId>) -> Option<SyncTicket> {
        self.epoch = self.epoch.wrapping_add(1);
        self.conversation = conversation;
        self.entries.clear();
        self.cursor = Sequence::ZERO;
        self.ledger.clear();
        self.ticket()
    }

    /// Opens `conversation` with an empty list and a zero cursor.
    pub fn open(&mut self, conversation: ConversationId) -> SyncTicket {
        self.reset(Some(conversation));
        SyncTicket {
            conversation,
            epoch: self.epoch,
        }
    }

    /// Closes the open conversation, if any.
    pub fn close(&mut self) {
        self.reset(None);
    }

    /// Ticket for a request issued now, or `None` with no open conversation.
    #[must_use]
    pub const fn ticket(&self) -> Option<SyncTicket> {
        match self.conversation {
            Some(conversation) => Some(SyncTicket {
                conversation,
                epoch: self.epoch,
            }),
            None => None,
        }
    }

    /// Whether a result issued under `ticket` may still be applied.
    #[must_use]
    pub fn is_current(&self, ticket: &SyncTicket) -> bool {
        self.epoch == ticket.epoch && self.conversation == Some(ticket.conversation)
    }

    #[must_use]
    pub const fn conversation(&self) -> Option<ConversationId> {
        self.conversation
    }

    /// Highest sequence incorporated so far.
    #[must_use]
    pub const fn cursor(&self) -> Sequence {
        self.cursor
    }

    /// Entries in display order: confirmed by sequence, then pending sends.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Lifecycle status of a provisional send, if it belongs to this session.
    #[must_use]
    pub fn status(&self, token: ProvisionalToken) -> Option<ProvisionalStatus> {
        self.ledger.get(&token).copied()
    }

    /// Whether a confirmed message with `id` is in the list.
    #[must_use]
    pub fn contains_message(&self, id: MessageId) -> bool {
        self.entries.iter().any(|e| e.message_id() == Some(id))
    }

    /// Number of sends still waiting for confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_provisional()).count()
    }

    /// Owned copy of the observable state.
    #[must_use]
    pub fn view(&self) -> SyncView {
        SyncView {
            conversation: self.conversation,
            entries: self.entries.clone(),
            cursor: self.cursor,
        }
    }
}

/// Snapshot of a [`SyncContext`] handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncView {
    /// Open conversation, if any.
    pub conversation: Option<ConversationId>,
    /// Entries in display order.
    pub entries: Vec<Entry>,
    /// Cursor at the time of the snapshot.
    pub cursor: Sequence,
}
