//! REST + server-sent-events backend client.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, warn};
use url::Url;

use crate::api::error::{ApiError, ApiResult};
use crate::api::sse::SseDecoder;
use crate::api::wire::{
    WireDetail, WireReply, WireSendRequest, WireSummary, parse_stream_payload,
};
use crate::api::{ApiFuture, ChatBackend, ChatReply, EventStream, SendRequest};
use crate::chat::core::config::BackendConfig;
use crate::chat::core::conversation::{ConversationDetail, ConversationSummary};
use crate::chat::core::ids::ConversationId;

/// Owner id given to streamed messages until the backend names the conversation.
const PENDING_OWNER: &str = "";

/// Chat backend reached over HTTP.
///
/// Only calls returning a complete body get a total deadline. A streamed reply
/// stays open as long as chunks keep arriving within the idle timeout.
#[derive(Clone, Debug)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpChatBackend {
    /// Build a client from backend settings.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created.
    pub fn new(config: &BackendConfig) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::HttpClient(format!(
                "base url cannot carry paths: {base_url}"
            )));
        }
        Ok(Self {
            client: Self::build_client(config)?,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn build_client(config: &BackendConfig) -> ApiResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::HttpClient(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .read_timeout(Duration::from_secs(config.stream_idle_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| ApiError::HttpClient(e.to_string()))
    }

    /// Base URL joined with path segments.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ApiError::HttpClient(format!("base url cannot carry paths: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Backend request failed");
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn send_body(request: &SendRequest) -> WireSendRequest {
        WireSendRequest {
            conversation_id: request
                .conversation_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
            message: request.content.clone(),
        }
    }

    fn owner(request: &SendRequest) -> ConversationId {
        request
            .conversation_id
            .clone()
            .unwrap_or_else(|| ConversationId::durable(PENDING_OWNER))
    }
}

impl ChatBackend for HttpChatBackend {
    fn list_conversations(&self) -> ApiFuture<'_, ApiResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats"])?;
            let request = self.client.get(url).timeout(self.request_timeout);
            let response = Self::check(request.send().await?).await?;
            let summaries: Vec<WireSummary> = response.json().await?;
            Ok(summaries.into_iter().map(WireSummary::into_summary).collect())
        })
    }

    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> ApiFuture<'_, ApiResult<ConversationDetail>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", id.as_str()])?;
            let request = self.client.get(url).timeout(self.request_timeout);
            let response = Self::check(request.send().await?).await?;
            let detail: WireDetail = response.json().await?;
            Ok(detail.into_detail())
        })
    }

    fn send_message(&self, request: SendRequest) -> ApiFuture<'_, ApiResult<ChatReply>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", "messages"])?;
            let response = self
                .client
                .post(url)
                .timeout(self.request_timeout)
                .json(&Self::send_body(&request))
                .send()
                .await?;
            let reply: WireReply = Self::check(response).await?.json().await?;
            Ok(reply.into_reply(&Self::owner(&request)))
        })
    }

    fn send_message_streaming(
        &self,
        request: SendRequest,
    ) -> ApiFuture<'_, ApiResult<EventStream>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", "messages", "stream"])?;
            let response = self
                .client
                .post(url)
                .header(ACCEPT, "text/event-stream")
                .json(&Self::send_body(&request))
                .send()
                .await?;
            let response = Self::check(response).await?;
            debug!(conversation_id = ?request.conversation_id, "Event stream opened");

            let state = StreamState {
                bytes: response.bytes_stream().boxed(),
                decoder: SseDecoder::new(),
                pending: VecDeque::new(),
                owner: Self::owner(&request),
                done: false,
            };
            let stream = futures::stream::unfold(state, |mut state| async move {
                loop {
                    if let Some(data) = state.pending.pop_front() {
                        let item = parse_stream_payload(&data, &state.owner);
                        return Some((item, state));
                    }
                    if state.done {
                        return None;
                    }
                    match state.bytes.next().await {
                        Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                        Some(Err(err)) => {
                            state.done = true;
                            return Some((Err(ApiError::from(err)), state));
                        }
                        None => {
                            state.done = true;
                            state.pending.extend(state.decoder.finish());
                        }
                    }
                }
            });
            Ok(stream.boxed())
        })
    }

    fn delete_conversation(&self, id: ConversationId) -> ApiFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["chats", id.as_str()])?;
            let request = self.client.delete(url).timeout(self.request_timeout);
            Self::check(request.send().await?).await?;
            Ok(())
        })
    }
}

struct StreamState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    owner: ConversationId,
    done: bool,
}
