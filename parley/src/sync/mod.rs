//! Client synchronization core.
//!
//! - [`context`]: the per-conversation state (entry list, cursor, ledger)
//! - [`reconcile`]: pure merge functions over that state
//! - [`controller`]: optimistic sends
//! - [`poller`]: periodic incremental fetches
//!
//! The state lives behind a [`SharedSync`] handle so the send path and the
//! poll task can both reach it. Every mutation bumps a version number on a
//! `watch` channel that renderers subscribe to.

pub mod context;
pub mod controller;
pub mod poller;
pub mod reconcile;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use parley_proto::message::ValidationError;

use crate::api::ApiError;

pub use context::{
    Entry, EntryId, ProvisionalEntry, ProvisionalStatus, ProvisionalToken, SyncContext,
    SyncTicket, SyncView,
};
pub use controller::{OptimisticMessageController, PendingSend, SendOutcome};
pub use poller::{PollOutcome, PollScheduler};
pub use reconcile::{FailOutcome, MergeReport};

/// Errors from the send path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The text was rejected locally; nothing was sent.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// No conversation is open.
    #[error("no conversation is open")]
    NoConversation,

    /// The create request failed; the pending entry was removed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Shared, observable handle to a [`SyncContext`].
#[derive(Debug, Clone)]
pub struct SharedSync {
    inner: Arc<Mutex<SyncContext>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for SharedSync {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSync {
    /// Creates a handle around an empty context.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(SyncContext::new())),
            version: Arc::new(version),
        }
    }

    /// Runs `f` with exclusive access and publishes a new version.
    ///
    /// The lock is held only for the duration of `f`; never call this from
    /// inside another `update` or `read`.
    pub fn update<R>(&self, f: impl FnOnce(&mut SyncContext) -> R) -> R {
        let result = f(&mut self.inner.lock());
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        result
    }

    /// Runs `f` with shared access. Does not publish a version.
    pub fn read<R>(&self, f: impl FnOnce(&SyncContext) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Owned snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncView {
        self.read(SyncContext::view)
    }

    /// Receiver that observes a new version after every mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}
