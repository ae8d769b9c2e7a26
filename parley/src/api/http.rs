//! HTTP implementation of [`ChatApi`] over reqwest.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use parley_proto::codec;
use parley_proto::conversation::{
    Conversation, ConversationPage, CreateConversationRequest, UpdateConversationRequest,
};
use parley_proto::message::{ConversationId, Sequence};
use parley_proto::sync::{CreateMessageRequest, CreateMessageResponse, FetchSinceResponse};

use super::{ApiError, ChatApi};

/// Client for the server's JSON API rooted at `{base}/api/`.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base: Url,
}

impl HttpChatApi {
    /// Creates a client for the server at `server_url` (e.g.
    /// `http://127.0.0.1:8000`), with `timeout` applied to every request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL does not parse or is not
    /// `http`/`https`, or [`ApiError::Network`] if the client cannot be built.
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base = Url::parse(server_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    /// Attaches `body` as a JSON request body.
    fn with_json<B: Serialize>(
        request: RequestBuilder,
        body: &B,
    ) -> Result<RequestBuilder, ApiError> {
        let bytes = codec::encode(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        Ok(request.header(CONTENT_TYPE, "application/json").body(bytes))
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::from_status(
                status.as_u16(),
                codec::error_detail(&body),
            ));
        }
        codec::decode(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpChatApi {
    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, ApiError> {
        let url = self.endpoint("api/conversations")?;
        let body = CreateConversationRequest {
            title: title.map(str::to_string),
        };
        Self::execute(Self::with_json(self.client.post(url), &body)?).await
    }

    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<ConversationPage, ApiError> {
        let url = self.endpoint("api/conversations")?;
        Self::execute(
            self.client
                .get(url)
                .query(&[("limit", limit), ("offset", offset)]),
        )
        .await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&format!("api/conversations/{id}"))?;
        Self::execute(self.client.get(url)).await
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&format!("api/conversations/{id}"))?;
        let body = UpdateConversationRequest {
            title: title.map(str::to_string),
        };
        Self::execute(Self::with_json(self.client.patch(url), &body)?).await
    }

    async fn create_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<CreateMessageResponse, ApiError> {
        let url = self.endpoint(&format!("api/conversations/{conversation}/messages"))?;
        let body = CreateMessageRequest {
            text: text.to_string(),
        };
        Self::execute(Self::with_json(self.client.post(url), &body)?).await
    }

    async fn fetch_since(
        &self,
        conversation: ConversationId,
        cursor: Sequence,
        limit: Option<usize>,
    ) -> Result<FetchSinceResponse, ApiError> {
        let url = self.endpoint(&format!("api/conversations/{conversation}/messages"))?;
        let mut request = self
            .client
            .get(url)
            .query(&[("since", cursor.get().to_string())]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        Self::execute(request).await
    }
}
