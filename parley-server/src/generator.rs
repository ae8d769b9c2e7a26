//! AI reply generation.
//!
//! The server treats reply generation as an opaque request/response call:
//! [`ReplyGenerator::generate`] gets the recent conversation history plus the
//! new user text and either returns reply text or fails with a
//! [`GeneratorError`]. Nothing is committed to the message log until a reply
//! has been produced.
//!
//! Implementations:
//! - [`EchoGenerator`]: deterministic offline replies
//! - [`GeminiGenerator`]: Google Gemini `generateContent` over HTTP

use std::time::Duration;

use serde::{Deserialize, Serialize};

use parley_proto::message::{Message, Role};

/// Default Gemini model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default Gemini API base URL.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default upstream timeout for one reply.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by a reply generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    /// The upstream call did not finish in time.
    #[error("reply generation timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream service failed or returned an error status.
    #[error("reply generation failed: {0}")]
    Upstream(String),

    /// The upstream service returned no usable text.
    #[error("reply generator returned an empty reply")]
    EmptyReply,

    /// No API key is configured for a generator that needs one.
    #[error("reply generator API key is missing; set GEMINI_API_KEY")]
    MissingApiKey,
}

/// Produces the AI reply for a new user turn.
pub trait ReplyGenerator: Send + Sync + 'static {
    /// Generates reply text for `prompt`, given up to the last few messages
    /// of the conversation (oldest first, not including `prompt`).
    fn generate(
        &self,
        history: &[Message],
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, GeneratorError>> + Send;
}

/// Deterministic generator that needs no network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerator;

impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GeneratorError> {
        let earlier = history.iter().filter(|m| m.role == Role::User).count();
        Ok(format!("You said: {prompt} (turn {})", earlier + 1))
    }
}

/// Generator backed by the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiGenerator {
    /// Creates a generator for `model`, authenticating with `api_key`.
    ///
    /// A missing key is not an error here; every call fails with
    /// [`GeneratorError::MissingApiKey`] instead.
    #[must_use]
    pub fn new(api_key: Option<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        }
    }

    /// Points the generator at a different API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request<'a>(history: &'a [Message], prompt: &'a str) -> GenerateContentRequest<'a> {
        let mut contents: Vec<Content<'a>> = history
            .iter()
            .map(|m| Content {
                role: match m.role {
                    Role::User => "user",
                    Role::Ai => "model",
                },
                parts: vec![RequestPart { text: &m.text }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![RequestPart { text: prompt }],
        });
        GenerateContentRequest { contents }
    }

    fn extract_text(response: GenerateContentResponse) -> Result<String, GeneratorError> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Err(GeneratorError::EmptyReply);
        }
        Ok(text.to_string())
    }
}

impl ReplyGenerator for GeminiGenerator {
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GeneratorError> {
        let api_key = self.api_key.as_deref().ok_or(GeneratorError::MissingApiKey)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::build_request(history, prompt);

        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout(self.timeout)
                } else {
                    GeneratorError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Upstream(format!("HTTP {status}: {body}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Upstream(e.to_string()))?;
        Self::extract_text(parsed)
    }
}

/// Generator selected at startup from configuration.
#[derive(Debug, Clone)]
pub enum AnyGenerator {
    /// Offline echo replies.
    Echo(EchoGenerator),
    /// Gemini over HTTP.
    Gemini(GeminiGenerator),
}

impl ReplyGenerator for AnyGenerator {
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GeneratorError> {
        match self {
            Self::Echo(g) => g.generate(history, prompt).await,
            Self::Gemini(g) => g.generate(history, prompt).await,
        }
    }
}
