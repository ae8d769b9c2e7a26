//! Periodic incremental fetch for the open conversation.
//!
//! [`PollScheduler::switch_to`] cancels the running poll task, resets the
//! shared context, and starts a new task for the new conversation. The
//! task's first tick fires immediately, then every `interval`. A tick that
//! finds the previous fetch still in flight is skipped, not queued, and a
//! failed fetch is logged and left for the next tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use parley_proto::message::ConversationId;

use crate::api::ChatApi;

use super::SharedSync;
use super::context::{SyncContext, SyncTicket};
use super::reconcile::{self, MergeReport};

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Result of one poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A batch was fetched and merged.
    Applied(MergeReport),
    /// Another fetch for the same conversation was still in flight, or the
    /// result arrived after a conversation switch.
    Skipped,
    /// The fetch failed; the next tick retries.
    Failed,
    /// No conversation is open.
    Idle,
}

/// Poll task of one open conversation.
struct ActivePoll {
    ticket: SyncTicket,
    cancel: CancellationToken,
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

/// Drives `fetchSince` for the open conversation.
pub struct PollScheduler<A: ChatApi> {
    api: Arc<A>,
    sync: SharedSync,
    interval: Duration,
    fetch_limit: Option<usize>,
    active: Mutex<Option<ActivePoll>>,
}

impl<A: ChatApi> PollScheduler<A> {
    /// Creates an idle scheduler. `interval` is raised to at least 1ms.
    pub fn new(api: Arc<A>, sync: SharedSync, interval: Duration) -> Self {
        Self {
            api,
            sync,
            interval: interval.max(Duration::from_millis(1)),
            fetch_limit: None,
            active: Mutex::new(None),
        }
    }

    /// Asks the server for at most `limit` messages per poll.
    #[must_use]
    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = Some(limit);
        self
    }

    /// Stops polling the current conversation, clears the local list and
    /// cursor, and starts polling `conversation` with an immediate fetch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn switch_to(&self, conversation: ConversationId) -> SyncTicket {
        let mut active = self.active.lock();
        if let Some(old) = active.take() {
            old.cancel.cancel();
            tracing::debug!(conversation_id = %old.ticket.conversation, "poller stopped");
        }

        let ticket = self.sync.update(|ctx| ctx.open(conversation));
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(tokio::sync::Mutex::new(()));

        tokio::spawn(run_loop(
            Arc::clone(&self.api),
            self.sync.clone(),
            ticket,
            Arc::clone(&in_flight),
            cancel.clone(),
            self.interval,
            self.fetch_limit,
        ));
        tracing::info!(
            conversation_id = %conversation,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "poller started"
        );

        *active = Some(ActivePoll {
            ticket,
            cancel,
            in_flight,
        });
        ticket
    }

    /// Polls the open conversation once, outside the timer.
    pub async fn poll_once(&self) -> PollOutcome {
        let current = self
            .active
            .lock()
            .as_ref()
            .map(|a| (a.ticket, Arc::clone(&a.in_flight)));
        let Some((ticket, in_flight)) = current else {
            return PollOutcome::Idle;
        };
        poll_tick(
            self.api.as_ref(),
            &self.sync,
            &ticket,
            &in_flight,
            self.fetch_limit,
        )
        .await
    }

    /// Stops polling and closes the conversation.
    pub fn stop(&self) {
        if let Some(old) = self.active.lock().take() {
            old.cancel.cancel();
            self.sync.update(SyncContext::close);
            tracing::info!(conversation_id = %old.ticket.conversation, "poller stopped");
        }
    }

    /// Conversation currently being polled.
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.active.lock().as_ref().map(|a| a.ticket.conversation)
    }
}

impl<A: ChatApi> Drop for PollScheduler<A> {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

async fn run_loop<A: ChatApi>(
    api: Arc<A>,
    sync: SharedSync,
    ticket: SyncTicket,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
    interval: Duration,
    fetch_limit: Option<usize>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = poll_tick(api.as_ref(), &sync, &ticket, &in_flight, fetch_limit) => {}
        }
    }
    tracing::debug!(conversation_id = %ticket.conversation, "poll loop exited");
}

async fn poll_tick<A: ChatApi>(
    api: &A,
    sync: &SharedSync,
    ticket: &SyncTicket,
    in_flight: &tokio::sync::Mutex<()>,
    fetch_limit: Option<usize>,
) -> PollOutcome {
    let Ok(_guard) = in_flight.try_lock() else {
        tracing::debug!(conversation_id = %ticket.conversation, "fetch in flight, tick skipped");
        return PollOutcome::Skipped;
    };
    let Some(cursor) = sync.read(|ctx| ctx.is_current(ticket).then(|| ctx.cursor())) else {
        return PollOutcome::Skipped;
    };

    match api.fetch_since(ticket.conversation, cursor, fetch_limit).await {
        Ok(batch) => {
            let report = sync.update(|ctx| reconcile::apply_poll(ctx, ticket, batch));
            if report.stale {
                return PollOutcome::Skipped;
            }
            tracing::debug!(
                conversation_id = %ticket.conversation,
                cursor = %report.cursor,
                appended = report.appended,
                resolved = report.resolved,
                duplicates = report.duplicates,
                "poll applied"
            );
            PollOutcome::Applied(report)
        }
        Err(e) => {
            tracing::warn!(
                conversation_id = %ticket.conversation,
                cursor = %cursor,
                error = %e,
                "poll failed, retrying next tick"
            );
            PollOutcome::Failed
        }
    }
}
