// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end tests: client sessions against a real server over HTTP.
//!
//! Covers the send/poll interleavings a user can actually produce:
//! - two quick sends resolve in order with no leftovers
//! - a failed send disappears and leaves nothing on the server
//! - two tabs writing to one conversation converge on the same list
//! - a send whose response skips someone else's turn never skips it for good
//! - renaming a conversation leaves its messages alone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parley::api::ApiError;
use parley::api::http::HttpChatApi;
use parley::session::{ChatSession, SessionSettings};
use parley::sync::{PollOutcome, SendError, SendOutcome, SyncView};
use parley_proto::message::{ConversationId, Message, Role, Sequence};
use parley_server::generator::{EchoGenerator, GeneratorError, ReplyGenerator};
use parley_server::http;
use parley_server::service::ChatService;

#[derive(Clone, Default)]
struct FlakyGenerator {
    failing: Arc<AtomicBool>,
}

impl ReplyGenerator for FlakyGenerator {
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GeneratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GeneratorError::Upstream("model unavailable".into()));
        }
        EchoGenerator.generate(history, prompt).await
    }
}

struct Harness {
    url: String,
    generator: FlakyGenerator,
    service: Arc<ChatService<FlakyGenerator>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let generator = FlakyGenerator::default();
        let service = Arc::new(ChatService::new(generator.clone()));
        let (addr, handle) = http::start_server("127.0.0.1:0", Arc::clone(&service))
            .await
            .unwrap();
        Self {
            url: format!("http://{addr}"),
            generator,
            service,
            handle,
        }
    }

    /// A session whose background poller only ticks once, on open.
    fn session(&self) -> ChatSession<HttpChatApi> {
        let api = HttpChatApi::new(&self.url, Duration::from_secs(5)).unwrap();
        let settings = SessionSettings {
            poll_interval: Duration::from_secs(3600),
            ..SessionSettings::default()
        };
        ChatSession::new(api, &settings)
    }

    async fn stored(&self, conversation: ConversationId) -> Vec<Message> {
        self.service
            .fetch_since(conversation, Sequence::ZERO, Some(200))
            .await
            .unwrap()
            .results
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs refreshes until one actually fetches.
async fn settle(session: &ChatSession<HttpChatApi>) -> SyncView {
    for _ in 0..100 {
        if matches!(session.refresh().await, PollOutcome::Applied(_)) {
            return session.snapshot();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never applied a poll");
}

fn texts(view: &SyncView) -> Vec<String> {
    view.entries.iter().map(|e| e.text().to_string()).collect()
}

fn sequences(view: &SyncView) -> Vec<u64> {
    view.entries
        .iter()
        .filter_map(|e| e.sequence().map(Sequence::get))
        .collect()
}

/// Every sequence up to the cursor is in the list.
fn assert_cursor_covered(view: &SyncView) {
    let seqs = sequences(view);
    for seq in 1..=view.cursor.get() {
        assert!(seqs.contains(&seq), "cursor {} skips {seq}", view.cursor);
    }
}

#[tokio::test]
async fn quick_sends_resolve_in_order() {
    let harness = Harness::start().await;
    let session = harness.session();
    session.start_conversation(None).await.unwrap();

    let first = session.submit("A").unwrap();
    let second = session.submit("B").unwrap();
    let view = session.snapshot();
    assert_eq!(texts(&view), vec!["A", "B"]);
    assert!(view.entries.iter().all(|e| e.is_provisional()));

    assert!(matches!(
        first.deliver().await.unwrap(),
        SendOutcome::Delivered { .. }
    ));
    assert!(matches!(
        second.deliver().await.unwrap(),
        SendOutcome::Delivered { .. }
    ));

    let view = session.snapshot();
    assert_eq!(
        texts(&view),
        vec!["A", "You said: A (turn 1)", "B", "You said: B (turn 2)"]
    );
    assert_eq!(sequences(&view), vec![1, 2, 3, 4]);
    assert_eq!(view.cursor, Sequence::new(4));

    // A later poll finds nothing new and changes nothing.
    let after = settle(&session).await;
    assert_eq!(after, view);
}

#[tokio::test]
async fn concurrent_sends_converge() {
    let harness = Harness::start().await;
    let session = harness.session();
    session.start_conversation(None).await.unwrap();

    let first = session.submit("same").unwrap();
    let second = session.submit("same").unwrap();
    let (a, b) = tokio::join!(first.deliver(), second.deliver());
    a.unwrap();
    b.unwrap();

    let view = settle(&session).await;
    assert_eq!(view.entries.len(), 4);
    assert!(view.entries.iter().all(|e| !e.is_provisional()));
    assert_eq!(sequences(&view), vec![1, 2, 3, 4]);
    assert_eq!(view.cursor, Sequence::new(4));
}

#[tokio::test]
async fn failed_send_is_removed_and_not_stored() {
    let harness = Harness::start().await;
    let session = harness.session();
    let conv = session.start_conversation(None).await.unwrap();

    harness.generator.failing.store(true, Ordering::SeqCst);
    let result = session.send("doomed").await;
    assert!(
        matches!(result, Err(SendError::Api(ApiError::Dependency(_)))),
        "{result:?}"
    );
    assert!(session.snapshot().entries.is_empty());
    assert!(harness.stored(conv.id).await.is_empty());

    // The user can simply retry.
    harness.generator.failing.store(false, Ordering::SeqCst);
    session.send("doomed").await.unwrap();
    let view = settle(&session).await;
    assert_eq!(sequences(&view), vec![1, 2]);
}

#[tokio::test]
async fn rejected_text_never_reaches_server() {
    let harness = Harness::start().await;
    let session = harness.session();
    let conv = session.start_conversation(None).await.unwrap();

    assert!(matches!(session.submit("   "), Err(SendError::Validation(_))));
    assert!(matches!(
        session.submit(&"x".repeat(1001)),
        Err(SendError::Validation(_))
    ));
    assert!(session.snapshot().entries.is_empty());
    assert!(harness.stored(conv.id).await.is_empty());
}

#[tokio::test]
async fn two_tabs_see_the_same_log() {
    let harness = Harness::start().await;
    let left = harness.session();
    let right = harness.session();
    let conv = left.start_conversation(Some("shared")).await.unwrap();
    right.open_conversation(conv.id).await.unwrap();

    left.send("from left").await.unwrap();
    right.send("from right").await.unwrap();

    let left_view = settle(&left).await;
    let right_view = settle(&right).await;
    assert_eq!(sequences(&left_view), vec![1, 2, 3, 4]);
    assert_eq!(texts(&left_view), texts(&right_view));
    assert_eq!(left_view.cursor, Sequence::new(4));
    assert_eq!(right_view.cursor, Sequence::new(4));
    assert_eq!(left_view.entries[0].role(), Role::User);
    assert_eq!(left_view.entries[1].role(), Role::Ai);
}

#[tokio::test]
async fn response_never_skips_another_tabs_turn() {
    let harness = Harness::start().await;
    let left = harness.session();
    let right = harness.session();
    let conv = left.start_conversation(None).await.unwrap();
    settle(&left).await;
    right.open_conversation(conv.id).await.unwrap();

    // Right commits sequences 1 and 2; left's own turn lands at 3 and 4.
    right.send("interleaved").await.unwrap();
    left.send("mine").await.unwrap();
    let view = left.snapshot();
    assert_cursor_covered(&view);
    assert!(view.entries.iter().any(|e| e.text() == "mine"));

    let view = settle(&left).await;
    assert_eq!(sequences(&view), vec![1, 2, 3, 4]);
    assert_eq!(view.entries[0].text(), "interleaved");
    assert_eq!(view.cursor, Sequence::new(4));
}

#[tokio::test]
async fn opening_unknown_conversation_fails() {
    let harness = Harness::start().await;
    let session = harness.session();
    let conv = session.start_conversation(None).await.unwrap();

    let result = session.open_conversation(ConversationId::new(4242)).await;
    assert!(matches!(result, Err(ApiError::NotFound(_))), "{result:?}");
    assert_eq!(session.active_conversation(), Some(conv.id));
}

#[tokio::test]
async fn switching_conversations_starts_fresh() {
    let harness = Harness::start().await;
    let session = harness.session();
    let first = session.start_conversation(Some("first")).await.unwrap();
    session.send("hello").await.unwrap();
    assert_eq!(session.snapshot().entries.len(), 2);

    session.start_conversation(Some("second")).await.unwrap();
    let view = settle(&session).await;
    assert!(view.entries.is_empty());
    assert_eq!(view.cursor, Sequence::ZERO);

    session.open_conversation(first.id).await.unwrap();
    let view = settle(&session).await;
    assert_eq!(view.entries.len(), 2);
    assert_eq!(view.conversation, Some(first.id));

    let page = session.list_conversations(10, 0).await.unwrap();
    assert_eq!(page.count, 2);
}

#[tokio::test]
async fn rename_over_http_keeps_sequences() {
    let harness = Harness::start().await;
    let session = harness.session();
    let conv = session.start_conversation(None).await.unwrap();
    session.send("where to eat").await.unwrap();

    let renamed = session.rename_conversation(Some("Dinner")).await.unwrap().unwrap();
    assert_eq!(renamed.id, conv.id);
    assert_eq!(renamed.title.as_deref(), Some("Dinner"));

    let result = session.rename_conversation(Some(&"x".repeat(201))).await;
    assert!(matches!(result, Err(ApiError::Validation(_))), "{result:?}");

    session.send("and after").await.unwrap();
    let view = settle(&session).await;
    assert_eq!(sequences(&view), vec![1, 2, 3, 4]);
    let stored = harness.service.get_conversation(conv.id).await.unwrap();
    assert_eq!(stored.title.as_deref(), Some("Dinner"));
}
