//! Pure merge functions over a [`SyncContext`].
//!
//! Every change to the local message list goes through this module,
//! whichever path delivered it:
//!
//! - [`insert_provisional`]: a send was submitted
//! - [`resolve_send`]: the send's own create response arrived
//! - [`fail_send`]: the create request failed
//! - [`apply_poll`]: a `fetchSince` batch arrived
//!
//! A send's confirmed message may arrive by poll before, after, or instead
//! of its create response. The functions below reach the same list in every
//! order, hold each confirmed id at most once, and never let two distinct
//! sends of identical text collapse into one entry.

use std::collections::BTreeSet;

use parley_proto::message::{Message, Role, Sequence, Timestamp};
use parley_proto::sync::FetchSinceResponse;

use super::context::{
    Entry, ProvisionalEntry, ProvisionalStatus, ProvisionalToken, SyncContext, SyncTicket,
};

/// Summary of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Confirmed messages appended as new entries.
    pub appended: usize,
    /// Provisional entries replaced by their confirmed message.
    pub resolved: usize,
    /// Confirmed messages already present and skipped.
    pub duplicates: usize,
    /// The ticket was stale and nothing was applied.
    pub stale: bool,
    /// Cursor after the merge.
    pub cursor: Sequence,
}

impl MergeReport {
    fn stale(cursor: Sequence) -> Self {
        Self {
            stale: true,
            cursor,
            ..Self::default()
        }
    }

    /// Whether the merge changed the list.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.appended > 0 || self.resolved > 0
    }
}

/// What [`fail_send`] did with the provisional entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The entry was pending and has been removed.
    Removed,
    /// A poll already confirmed the message; nothing was removed.
    Kept,
    /// The conversation changed since the send started.
    Stale,
}

/// Which path delivered a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Poll,
    Response,
}

enum Merged {
    Duplicate,
    Resolved,
    Appended,
}

/// Appends a pending provisional entry at the tail of the list.
///
/// Returns `false` and changes nothing when `ticket` is stale.
pub fn insert_provisional(
    ctx: &mut SyncContext,
    ticket: &SyncTicket,
    token: ProvisionalToken,
    role: Role,
    text: impl Into<String>,
) -> bool {
    if !ctx.is_current(ticket) {
        return false;
    }
    ctx.entries.push(Entry::Provisional(ProvisionalEntry {
        token,
        role,
        text: text.into(),
        created_at: Timestamp::now(),
    }));
    ctx.ledger.insert(token, ProvisionalStatus::Pending);
    true
}

/// Merges a poll batch and advances the cursor to at least its `lastSeq`.
pub fn apply_poll(
    ctx: &mut SyncContext,
    ticket: &SyncTicket,
    batch: FetchSinceResponse,
) -> MergeReport {
    if !ctx.is_current(ticket) {
        return MergeReport::stale(ctx.cursor);
    }

    let mut report = MergeReport::default();
    let batch_max = batch.results.iter().map(|m| m.sequence).max();
    for message in batch.results {
        tally(&mut report, merge_confirmed(ctx, message, Path::Poll));
    }
    sort_entries(ctx);

    let high = batch_max.map_or(batch.last_seq, |m| m.max(batch.last_seq));
    ctx.cursor = ctx.cursor.max(high);
    advance_contiguous(ctx);

    report.cursor = ctx.cursor;
    report
}

/// Applies a send's own create response.
///
/// A pending provisional is replaced in place by the user message. If a
/// poll already resolved it, the user message is only deduplicated. The AI
/// reply ends up present exactly once either way. The cursor only moves
/// across sequences contiguous with what the list already holds, so a turn
/// committed by someone else in between is still fetched by the next poll.
pub fn resolve_send(
    ctx: &mut SyncContext,
    ticket: &SyncTicket,
    token: ProvisionalToken,
    user: Message,
    ai: Message,
) -> MergeReport {
    if !ctx.is_current(ticket) {
        return MergeReport::stale(ctx.cursor);
    }

    let mut report = MergeReport::default();
    if ctx.ledger.get(&token).is_some_and(|s| s.is_pending()) {
        let user_id = user.id;
        let slot = ctx
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Provisional(p) if p.token == token));
        if ctx.contains_message(user_id) {
            // A poll delivered this message but matched it to an earlier
            // identical send; this placeholder is now redundant.
            if let Some(i) = slot {
                ctx.entries.remove(i);
            }
            report.duplicates += 1;
        } else if let Some(i) = slot {
            ctx.entries[i] = Entry::Confirmed(user);
            report.resolved += 1;
        } else {
            ctx.entries.push(Entry::Confirmed(user));
            report.appended += 1;
        }
        ctx.ledger
            .insert(token, ProvisionalStatus::Confirmed(user_id));
    } else {
        tally(&mut report, merge_confirmed(ctx, user, Path::Response));
    }
    tally(&mut report, merge_confirmed(ctx, ai, Path::Response));

    sort_entries(ctx);
    advance_contiguous(ctx);
    report.cursor = ctx.cursor;
    report
}

/// Handles a failed create request.
///
/// A pending entry is removed and marked failed. An entry a poll already
/// confirmed is left alone, since the message does exist on the server.
pub fn fail_send(ctx: &mut SyncContext, ticket: &SyncTicket, token: ProvisionalToken) -> FailOutcome {
    if !ctx.is_current(ticket) {
        return FailOutcome::Stale;
    }
    if !ctx.ledger.get(&token).is_some_and(|s| s.is_pending()) {
        return FailOutcome::Kept;
    }
    ctx.entries
        .retain(|e| !matches!(e, Entry::Provisional(p) if p.token == token));
    ctx.ledger.insert(token, ProvisionalStatus::Failed);
    FailOutcome::Removed
}

fn tally(report: &mut MergeReport, merged: Merged) {
    match merged {
        Merged::Duplicate => report.duplicates += 1,
        Merged::Resolved => report.resolved += 1,
        Merged::Appended => report.appended += 1,
    }
}

/// Deduplicates `message` by id, then matches it FIFO against the oldest
/// pending provisional with the same role and text.
fn merge_confirmed(ctx: &mut SyncContext, message: Message, path: Path) -> Merged {
    if ctx.contains_message(message.id) {
        return Merged::Duplicate;
    }

    let matched = ctx.entries.iter().position(|e| match e {
        Entry::Provisional(p) => {
            p.role == message.role
                && p.text == message.text
                && ctx.ledger.get(&p.token).is_some_and(|s| s.is_pending())
        }
        Entry::Confirmed(_) => false,
    });

    let Some(index) = matched else {
        ctx.entries.push(Entry::Confirmed(message));
        return Merged::Appended;
    };

    if let Entry::Provisional(p) = &ctx.entries[index] {
        let status = match path {
            Path::Poll => ProvisionalStatus::Superseded(message.id),
            Path::Response => ProvisionalStatus::Confirmed(message.id),
        };
        ctx.ledger.insert(p.token, status);
    }
    ctx.entries[index] = Entry::Confirmed(message);
    Merged::Resolved
}

/// Confirmed entries by ascending sequence, then pending entries in
/// submission order. The sort is stable.
fn sort_entries(ctx: &mut SyncContext) {
    ctx.entries.sort_by_key(|e| match e {
        Entry::Confirmed(m) => (0u8, m.sequence),
        Entry::Provisional(_) => (1u8, Sequence::ZERO),
    });
}

/// Moves the cursor forward while the next sequence is already held.
fn advance_contiguous(ctx: &mut SyncContext) {
    let held: BTreeSet<Sequence> = ctx
        .entries
        .iter()
        .filter_map(Entry::sequence)
        .filter(|s| *s > ctx.cursor)
        .collect();
    for seq in held {
        if seq != ctx.cursor.next() {
            break;
        }
        ctx.cursor = seq;
    }
}
