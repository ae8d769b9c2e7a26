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

//! Integration tests for the server's HTTP API.
//!
//! Each test starts the real axum server on an OS-assigned port and talks
//! to it with reqwest:
//! - create / list / get / retitle conversations
//! - create message returns the user turn and AI reply with consecutive sequences
//! - fetch since a cursor is ordered, idempotent, and pageable
//! - invalid cursors, text, titles, paths and bodies are 400 with a JSON
//!   detail; unknown conversations 404
//! - a failing generator is 502 and stores nothing

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parley_proto::conversation::{Conversation, ConversationPage};
use parley_proto::message::{Message, Role, Sequence};
use parley_proto::sync::{CreateMessageResponse, ErrorBody, FetchSinceResponse};
use parley_server::generator::{EchoGenerator, GeneratorError, ReplyGenerator};
use parley_server::http;
use parley_server::service::ChatService;
use reqwest::StatusCode;
use serde_json::json;

/// Echo generator that can be switched into failure mode.
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

struct TestServer {
    base: String,
    client: reqwest::Client,
    generator: FlakyGenerator,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let generator = FlakyGenerator::default();
        let service = Arc::new(ChatService::new(generator.clone()));
        let (addr, handle) = http::start_server("127.0.0.1:0", service).await.unwrap();
        Self {
            base: format!("http://{addr}/api"),
            client: reqwest::Client::new(),
            generator,
            handle,
        }
    }

    async fn create_conversation(&self, title: Option<&str>) -> Conversation {
        let response = self
            .client
            .post(format!("{}/conversations", self.base))
            .json(&json!({ "title": title }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }

    async fn post_message(&self, conversation: &Conversation, text: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/conversations/{}/messages", self.base, conversation.id))
            .json(&json!({ "text": text }))
            .send()
            .await
            .unwrap()
    }

    async fn patch_title(
        &self,
        conversation: &Conversation,
        title: serde_json::Value,
    ) -> reqwest::Response {
        self.client
            .patch(format!("{}/conversations/{}", self.base, conversation.id))
            .json(&json!({ "title": title }))
            .send()
            .await
            .unwrap()
    }

    async fn fetch(&self, conversation: &Conversation, query: &str) -> reqwest::Response {
        self.client
            .get(format!(
                "{}/conversations/{}/messages?{query}",
                self.base, conversation.id
            ))
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn conversation_lifecycle() {
    let server = TestServer::start().await;
    let titled = server.create_conversation(Some("  Trip  ")).await;
    assert_eq!(titled.title.as_deref(), Some("Trip"));
    let blank = server.create_conversation(Some("   ")).await;
    assert_eq!(blank.title, None);

    let fetched: Conversation = server
        .client
        .get(format!("{}/conversations/{}", server.base, titled.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, titled);

    // Writing to the first conversation moves it to the top of the listing.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let response = server.post_message(&titled, "hello").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let page: ConversationPage = server
        .client
        .get(format!("{}/conversations?limit=1", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page.count, 2);
    assert_eq!(page.limit, 1);
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].id, titled.id);
}

#[tokio::test]
async fn create_message_commits_user_and_ai_turn() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;

    let response = server.post_message(&conv, "  hi there ").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: CreateMessageResponse = response.json().await.unwrap();
    assert_eq!(body.user_message.text, "hi there");
    assert_eq!(body.user_message.role, Role::User);
    assert_eq!(body.user_message.sequence, Sequence::new(1));
    assert_eq!(body.ai_message.role, Role::Ai);
    assert_eq!(body.ai_message.sequence, Sequence::new(2));

    // Untitled conversations take their title from the first message.
    let conv: Conversation = server
        .client
        .get(format!("{}/conversations/{}", server.base, conv.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(conv.title.as_deref(), Some("hi there"));
}

#[tokio::test]
async fn wire_format_uses_last_seq_key() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;
    server.post_message(&conv, "one").await;

    let raw: serde_json::Value = server.fetch(&conv, "since=0").await.json().await.unwrap();
    assert_eq!(raw["lastSeq"], 2);
    assert_eq!(raw["results"][0]["role"], "user");
    assert_eq!(raw["results"][1]["role"], "ai");
}

#[tokio::test]
async fn fetch_since_is_ordered_and_idempotent() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;
    for text in ["a", "b", "c"] {
        server.post_message(&conv, text).await;
    }

    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    let seqs: Vec<u64> = all.results.iter().map(|m| m.sequence.get()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(all.last_seq, Sequence::new(6));

    let tail: FetchSinceResponse = server.fetch(&conv, "since=4").await.json().await.unwrap();
    assert_eq!(tail.results.len(), 2);
    assert!(tail.results.iter().all(|m| m.sequence > Sequence::new(4)));

    for _ in 0..2 {
        let empty: FetchSinceResponse = server.fetch(&conv, "since=6").await.json().await.unwrap();
        assert!(empty.results.is_empty());
        assert_eq!(empty.last_seq, Sequence::new(6));
    }

    // Missing cursor means from the beginning.
    let default: FetchSinceResponse = server.fetch(&conv, "").await.json().await.unwrap();
    assert_eq!(default.results.len(), 6);
}

#[tokio::test]
async fn fetch_pages_never_skip() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;
    for text in ["a", "b", "c"] {
        server.post_message(&conv, text).await;
    }

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let page: FetchSinceResponse = server
            .fetch(&conv, &format!("since={cursor}&limit=4"))
            .await
            .json()
            .await
            .unwrap();
        if page.results.is_empty() {
            break;
        }
        assert!(page.results.len() <= 4);
        seen.extend(page.results.iter().map(|m| m.sequence.get()));
        cursor = page.last_seq.get();
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn invalid_requests_are_400() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;

    for query in ["since=-1", "since=abc", "since=1.5"] {
        let response = server.fetch(&conv, query).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
        let body: ErrorBody = response.json().await.unwrap();
        assert!(!body.detail.is_empty());
    }

    let empty = server.post_message(&conv, "   ").await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let long = server.post_message(&conv, &"x".repeat(1001)).await;
    assert_eq!(long.status(), StatusCode::BAD_REQUEST);

    // Nothing was stored.
    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    assert!(all.results.is_empty());
}

#[tokio::test]
async fn unknown_conversation_is_404() {
    let server = TestServer::start().await;
    let ghost = Conversation {
        id: parley_proto::message::ConversationId::new(999),
        title: None,
        created_at: parley_proto::message::Timestamp::from_millis(0),
        updated_at: parley_proto::message::Timestamp::from_millis(0),
    };

    assert_eq!(
        server.fetch(&ghost, "since=0").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        server.post_message(&ghost, "hello").await.status(),
        StatusCode::NOT_FOUND
    );
    let response = server
        .client
        .get(format!("{}/conversations/999", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generator_failure_is_502_and_stores_nothing() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;
    server.post_message(&conv, "first").await;

    server.generator.failing.store(true, Ordering::SeqCst);
    let response = server.post_message(&conv, "second").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorBody = response.json().await.unwrap();
    assert!(body.detail.contains("model unavailable"), "{}", body.detail);

    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    assert_eq!(all.results.len(), 2);
    assert_eq!(all.last_seq, Sequence::new(2));

    // A retry after recovery continues right after the last stored turn.
    server.generator.failing.store(false, Ordering::SeqCst);
    let retry: CreateMessageResponse = server
        .post_message(&conv, "second")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(retry.user_message.sequence, Sequence::new(3));
}

#[tokio::test]
async fn concurrent_tabs_get_distinct_sequences() {
    let server = Arc::new(TestServer::start().await);
    let conv = server.create_conversation(None).await;

    let mut tasks = Vec::new();
    for i in 0..4 {
        let server = Arc::clone(&server);
        let conv = conv.clone();
        tasks.push(tokio::spawn(async move {
            let response = server.post_message(&conv, &format!("tab {i}")).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            response.json::<CreateMessageResponse>().await.unwrap()
        }));
    }
    for task in tasks {
        let turn = task.await.unwrap();
        assert_eq!(turn.ai_message.sequence, turn.user_message.sequence.next());
    }

    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    let seqs: Vec<u64> = all.results.iter().map(|m| m.sequence.get()).collect();
    assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn malformed_path_and_body_are_json_400() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(None).await;

    let misspelled = server
        .client
        .post(format!("{}/conversations/{}/messages", server.base, conv.id))
        .json(&json!({ "txt": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(misspelled.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = misspelled.json().await.unwrap();
    assert!(body.detail.contains("text"), "{}", body.detail);

    let not_json = server
        .client
        .post(format!("{}/conversations/{}/messages", server.base, conv.id))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
    let _: ErrorBody = not_json.json().await.unwrap();

    for path in ["conversations/abc/messages", "conversations/abc", "conversations/-1"] {
        let response = server
            .client
            .get(format!("{}/{path}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
        let body: ErrorBody = response.json().await.unwrap();
        assert!(!body.detail.is_empty(), "{path}");
    }

    // Nothing was stored, and a bodyless create still works.
    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    assert!(all.results.is_empty());
    let bare = server
        .client
        .post(format!("{}/conversations", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(bare.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn patch_sets_and_clears_title() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(Some("Draft")).await;
    server.post_message(&conv, "one").await;

    let response = server.patch_title(&conv, json!("  Final  ")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let renamed: Conversation = response.json().await.unwrap();
    assert_eq!(renamed.id, conv.id);
    assert_eq!(renamed.title.as_deref(), Some("Final"));
    assert!(renamed.updated_at >= conv.updated_at);

    let cleared: Conversation = server
        .patch_title(&conv, json!("   "))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(cleared.title, None);

    let renamed: Conversation = server
        .patch_title(&conv, json!("Again"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(renamed.title.as_deref(), Some("Again"));
    let nulled: Conversation = server
        .patch_title(&conv, serde_json::Value::Null)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(nulled.title, None);

    // Retitling never touches the message log.
    let all: FetchSinceResponse = server.fetch(&conv, "since=0").await.json().await.unwrap();
    let seqs: Vec<u64> = all.results.iter().map(|m| m.sequence.get()).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(all.last_seq, Sequence::new(2));
    let next: CreateMessageResponse = server.post_message(&conv, "two").await.json().await.unwrap();
    assert_eq!(next.user_message.sequence, Sequence::new(3));
}

#[tokio::test]
async fn patch_rejects_bad_titles() {
    let server = TestServer::start().await;
    let conv = server.create_conversation(Some("Keep")).await;

    let long = server.patch_title(&conv, json!("x".repeat(300))).await;
    assert_eq!(long.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = long.json().await.unwrap();
    assert!(body.detail.contains("title"), "{}", body.detail);

    let wrong_type = server.patch_title(&conv, json!(42)).await;
    assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);

    let fetched: Conversation = server
        .client
        .get(format!("{}/conversations/{}", server.base, conv.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.title.as_deref(), Some("Keep"));

    let ghost = Conversation {
        id: parley_proto::message::ConversationId::new(999),
        ..conv
    };
    let missing = server.patch_title(&ghost, json!("x")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
