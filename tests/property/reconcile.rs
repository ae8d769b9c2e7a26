// Test-specific lint overrides: property tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value
)]

//! Property tests for client-side reconciliation.
//!
//! A simulated server commits a batch of sends in a random order while
//! responses and paged polls reach the client in a random interleaving.
//! After every step:
//! 1. The cursor never moves backwards.
//! 2. No message id appears twice.
//! 3. Confirmed entries are ordered by sequence and precede pending ones.
//! 4. Every sequence up to the cursor is present.
//! 5. Exactly the pending sends are shown as provisional.
//!
//! Once everything is committed, delivered, and polled, the list holds every
//! message once, in sequence order, with no provisional entries left.

use std::collections::HashSet;

use parley::sync::reconcile;
use parley::sync::{Entry, ProvisionalStatus, ProvisionalToken, SyncContext, SyncTicket};
use parley_proto::message::{ConversationId, Message, MessageId, Role, Sequence, Timestamp};
use parley_proto::sync::FetchSinceResponse;
use proptest::prelude::*;
use proptest::sample::Index;

const CONV: ConversationId = ConversationId::new(1);

fn message(seq: u64, role: Role, text: &str) -> Message {
    Message {
        id: MessageId::new(1000 + seq),
        conversation: CONV,
        role,
        text: text.to_string(),
        sequence: Sequence::new(seq),
        created_at: Timestamp::from_millis(seq),
    }
}

#[derive(Debug, Clone)]
enum Step {
    /// The server commits the next turn.
    Commit,
    /// One committed turn's response reaches the client.
    Respond(Index),
    /// A poll with the given page size.
    Poll(usize),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Commit),
        any::<Index>().prop_map(Step::Respond),
        (1usize..4).prop_map(Step::Poll),
    ]
}

/// Send texts (drawn from a small set so duplicates are common), the order
/// the server commits them in, and the delivery interleaving.
fn arb_scenario() -> impl Strategy<Value = (Vec<&'static str>, Vec<usize>, Vec<Step>)> {
    prop::collection::vec(prop::sample::select(vec!["hi", "yo"]), 1..6).prop_flat_map(|texts| {
        let order = Just((0..texts.len()).collect::<Vec<_>>()).prop_shuffle();
        (Just(texts), order, prop::collection::vec(arb_step(), 0..40))
    })
}

struct Replay {
    ctx: SyncContext,
    ticket: SyncTicket,
    tokens: Vec<ProvisionalToken>,
    /// (send index, user message, AI message) in commit order.
    turns: Vec<(usize, Message, Message)>,
    committed: usize,
    undelivered: Vec<usize>,
    last_cursor: Sequence,
}

impl Replay {
    fn new(texts: &[&str], order: &[usize]) -> Self {
        let mut ctx = SyncContext::new();
        let ticket = ctx.open(CONV);
        let tokens = texts
            .iter()
            .map(|text| {
                let token = ProvisionalToken::new();
                assert!(reconcile::insert_provisional(
                    &mut ctx,
                    &ticket,
                    token,
                    Role::User,
                    *text
                ));
                token
            })
            .collect();
        let turns = order
            .iter()
            .enumerate()
            .map(|(position, &send)| {
                let seq = 2 * u64::try_from(position).unwrap() + 1;
                let text = texts[send];
                (
                    send,
                    message(seq, Role::User, text),
                    message(seq + 1, Role::Ai, &format!("re: {text}")),
                )
            })
            .collect();
        Self {
            ctx,
            ticket,
            tokens,
            turns,
            committed: 0,
            undelivered: Vec::new(),
            last_cursor: Sequence::ZERO,
        }
    }

    fn commit(&mut self) {
        if self.committed < self.turns.len() {
            self.undelivered.push(self.committed);
            self.committed += 1;
        }
    }

    fn respond(&mut self, pick: usize) {
        if self.undelivered.is_empty() {
            return;
        }
        let position = self.undelivered.remove(pick % self.undelivered.len());
        let (send, user, ai) = self.turns[position].clone();
        reconcile::resolve_send(&mut self.ctx, &self.ticket, self.tokens[send], user, ai);
    }

    /// Returns whether the poll fetched anything.
    fn poll(&mut self, limit: usize) -> bool {
        let cursor = self.ctx.cursor();
        let results: Vec<Message> = self.turns[..self.committed]
            .iter()
            .flat_map(|(_, user, ai)| [user.clone(), ai.clone()])
            .filter(|m| m.sequence > cursor)
            .take(limit)
            .collect();
        let fetched = !results.is_empty();
        reconcile::apply_poll(
            &mut self.ctx,
            &self.ticket,
            FetchSinceResponse::from_batch(cursor, results),
        );
        fetched
    }

    fn step(&mut self, step: &Step) {
        match step {
            Step::Commit => self.commit(),
            Step::Respond(index) => self.respond(index.index(usize::MAX)),
            Step::Poll(limit) => {
                self.poll(*limit);
            }
        }
    }

    fn check(&mut self) -> Result<(), TestCaseError> {
        let cursor = self.ctx.cursor();
        prop_assert!(cursor >= self.last_cursor, "cursor went backwards");
        self.last_cursor = cursor;

        let entries = self.ctx.entries();
        let ids: Vec<MessageId> = entries.iter().filter_map(Entry::message_id).collect();
        let unique: HashSet<MessageId> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len(), "duplicate message id");

        let first_provisional = entries
            .iter()
            .position(Entry::is_provisional)
            .unwrap_or(entries.len());
        prop_assert!(entries[first_provisional..].iter().all(Entry::is_provisional));
        let seqs: Vec<Sequence> = entries.iter().filter_map(Entry::sequence).collect();
        prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]), "out of order");

        for seq in 1..=cursor.get() {
            prop_assert!(seqs.contains(&Sequence::new(seq)), "cursor skips {}", seq);
        }

        let pending = self
            .tokens
            .iter()
            .filter(|t| self.ctx.status(**t).is_some_and(ProvisionalStatus::is_pending))
            .count();
        prop_assert_eq!(self.ctx.pending_count(), pending);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), TestCaseError> {
        while self.committed < self.turns.len() {
            self.commit();
            self.check()?;
        }
        while !self.undelivered.is_empty() {
            self.respond(0);
            self.check()?;
        }
        while self.poll(3) {
            self.check()?;
        }
        self.check()
    }
}

proptest! {
    #[test]
    fn any_interleaving_converges((texts, order, steps) in arb_scenario()) {
        let mut replay = Replay::new(&texts, &order);
        replay.check()?;
        for step in &steps {
            replay.step(step);
            replay.check()?;
        }
        replay.drain()?;

        let total = 2 * texts.len();
        let entries = replay.ctx.entries();
        prop_assert_eq!(entries.len(), total);
        prop_assert_eq!(replay.ctx.pending_count(), 0);
        let seqs: Vec<u64> = entries
            .iter()
            .filter_map(|e| e.sequence().map(Sequence::get))
            .collect();
        prop_assert_eq!(seqs, (1..=u64::try_from(total).unwrap()).collect::<Vec<_>>());
        prop_assert_eq!(replay.ctx.cursor(), Sequence::new(u64::try_from(total).unwrap()));

        for token in &replay.tokens {
            let status = replay.ctx.status(*token);
            prop_assert!(
                matches!(
                    status,
                    Some(ProvisionalStatus::Confirmed(_) | ProvisionalStatus::Superseded(_))
                ),
                "unresolved token {:?}",
                status
            );
        }
    }

    #[test]
    fn stale_ticket_changes_nothing((texts, order, steps) in arb_scenario()) {
        let mut replay = Replay::new(&texts, &order);
        for step in &steps {
            replay.step(step);
        }
        while replay.committed < replay.turns.len() {
            replay.commit();
        }

        // Reopen the same conversation; everything issued before is stale.
        let stale = replay.ticket;
        let fresh = replay.ctx.open(CONV);
        let before = replay.ctx.view();

        for (send, user, ai) in replay.turns.clone() {
            let report = reconcile::resolve_send(
                &mut replay.ctx,
                &stale,
                replay.tokens[send],
                user.clone(),
                ai.clone(),
            );
            prop_assert!(report.stale);
            let report = reconcile::apply_poll(
                &mut replay.ctx,
                &stale,
                FetchSinceResponse::from_batch(Sequence::ZERO, vec![user, ai]),
            );
            prop_assert!(report.stale);
        }
        prop_assert!(!reconcile::insert_provisional(
            &mut replay.ctx,
            &stale,
            ProvisionalToken::new(),
            Role::User,
            "late",
        ));
        prop_assert_eq!(replay.ctx.view(), before);
        prop_assert!(replay.ctx.is_current(&fresh));
    }
}
