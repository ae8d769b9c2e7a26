//! HTTP surface of the message log server.
//!
//! Routes:
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | `POST` | `/api/conversations` | create conversation |
//! | `GET` | `/api/conversations?limit&offset` | list conversations |
//! | `GET` | `/api/conversations/{id}` | get conversation |
//! | `PATCH` | `/api/conversations/{id}` | set or clear the title |
//! | `GET` | `/api/conversations/{id}/messages?since&limit` | fetch since cursor |
//! | `POST` | `/api/conversations/{id}/messages` | create message |
//!
//! Every failure is answered with a JSON [`ErrorBody`], including path and
//! body extraction failures, which are 400.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use parley_proto::conversation::{CreateConversationRequest, UpdateConversationRequest};
use parley_proto::message::ConversationId;
use parley_proto::sync::{CreateMessageRequest, ErrorBody, parse_clamped, parse_cursor};

use crate::generator::ReplyGenerator;
use crate::service::{ChatService, ServiceError};

/// Default page size of the conversation listing.
const DEFAULT_LIST_LIMIT: usize = 20;

/// Largest page size of the conversation listing.
const MAX_LIST_LIMIT: usize = 100;

impl ServiceError {
    /// HTTP status this error is reported with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidCursor(_)
            | Self::InvalidTitle(_)
            | Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::SequenceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "request rejected");
        }
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

impl From<PathRejection> for ServiceError {
    fn from(rejection: PathRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

/// Builds the API router over a shared [`ChatService`].
pub fn router<G: ReplyGenerator>(service: Arc<ChatService<G>>) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations::<G>).post(create_conversation::<G>),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation::<G>).patch(update_conversation::<G>),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(fetch_since::<G>).post(create_message::<G>),
        )
        .with_state(service)
}

async fn create_conversation<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    body: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    // A bodyless POST creates an untitled conversation.
    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateConversationRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let conversation = service.create_conversation(request.title.as_deref()).await;
    Ok((StatusCode::CREATED, Json(conversation)).into_response())
}

async fn list_conversations<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit = parse_clamped(
        params.get("limit").map(String::as_str),
        DEFAULT_LIST_LIMIT,
        1,
        MAX_LIST_LIMIT,
    );
    let offset = parse_clamped(params.get("offset").map(String::as_str), 0, 0, usize::MAX);
    Json(service.list_conversations(limit, offset).await).into_response()
}

async fn get_conversation<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    path: Result<Path<u64>, PathRejection>,
) -> Result<Response, ServiceError> {
    let Path(id) = path?;
    let conversation = service.get_conversation(ConversationId::new(id)).await?;
    Ok(Json(conversation).into_response())
}

async fn update_conversation<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    path: Result<Path<u64>, PathRejection>,
    body: Result<Json<UpdateConversationRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Path(id) = path?;
    let Json(request) = body?;
    let conversation = service
        .update_conversation(ConversationId::new(id), request.title.as_deref())
        .await?;
    Ok(Json(conversation).into_response())
}

async fn fetch_since<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    path: Result<Path<u64>, PathRejection>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ServiceError> {
    let Path(id) = path?;
    let cursor = parse_cursor(params.get("since").map(String::as_str))?;
    let limits = service.limits();
    let limit = parse_clamped(
        params.get("limit").map(String::as_str),
        limits.fetch_default_limit,
        1,
        limits.fetch_max_limit,
    );
    let response = service
        .fetch_since(ConversationId::new(id), cursor, Some(limit))
        .await?;
    Ok(Json(response).into_response())
}

async fn create_message<G: ReplyGenerator>(
    State(service): State<Arc<ChatService<G>>>,
    path: Result<Path<u64>, PathRejection>,
    body: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Path(id) = path?;
    let Json(request) = body?;
    let response = service
        .create_message(ConversationId::new(id), &request.text)
        .await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Starts the server in-process with the given service.
///
/// Binds to `addr` (use port `0` for an OS-assigned port) and returns the
/// bound address and the server task handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<G: ReplyGenerator>(
    addr: &str,
    service: Arc<ChatService<G>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
