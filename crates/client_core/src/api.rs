use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{ChatId, FileId, MessageId, MessageKind, StickerId},
    error::{ApiError, ErrorCode},
    protocol::{ChatSummary, MessagePayload, ReactionAction},
};

use crate::CredentialStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MessageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<StickerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            sticker_id: None,
            file_id: None,
            duration_seconds: None,
            reply_to_message_id: None,
        }
    }

    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ReactionToggleResponse {
    action: ReactionAction,
}

/// The out-of-band request API. Consumed, never implemented, by this crate;
/// the trait seam keeps tests on in-process fakes.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError>;
    async fn list_messages(
        &self,
        chat_id: ChatId,
        query: MessageQuery,
    ) -> Result<Vec<MessagePayload>, ApiError>;
    async fn send_message(
        &self,
        chat_id: ChatId,
        request: SendMessageRequest,
    ) -> Result<MessagePayload, ApiError>;
    async fn mark_read(&self, chat_id: ChatId) -> Result<(), ApiError>;
    async fn toggle_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ReactionAction, ApiError>;
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessagePayload, ApiError>;
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId)
        -> Result<(), ApiError>;
    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ApiError>;
    async fn unpin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ApiError>;
}

/// reqwest-backed implementation against the chat REST surface. A 401 clears
/// the stored credential so the session is not retried with a known-bad
/// token.
pub struct HttpApi {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let token = self
            .credentials
            .access_token()
            .ok_or_else(|| ApiError::unauthorized("no credential available"))?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ApiError::internal(format!("request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.credentials.clear();
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        Err(ApiError::new(
            ErrorCode::from_status(status.as_u16()),
            message,
        ))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|err| ApiError::internal(format!("invalid response payload: {err}")))
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.json(self.http.get(self.url("/chats"))).await
    }

    async fn list_messages(
        &self,
        chat_id: ChatId,
        query: MessageQuery,
    ) -> Result<Vec<MessagePayload>, ApiError> {
        self.json(
            self.http
                .get(self.url(&format!("/chats/{}/messages", chat_id.0)))
                .query(&query),
        )
        .await
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        request: SendMessageRequest,
    ) -> Result<MessagePayload, ApiError> {
        self.json(
            self.http
                .post(self.url(&format!("/chats/{}/messages", chat_id.0)))
                .json(&request),
        )
        .await
    }

    async fn mark_read(&self, chat_id: ChatId) -> Result<(), ApiError> {
        self.execute(self.http.post(self.url(&format!("/chats/{}/read", chat_id.0))))
            .await?;
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ReactionAction, ApiError> {
        let response: ReactionToggleResponse = self
            .json(
                self.http
                    .post(self.url(&format!(
                        "/chats/{}/messages/{}/reactions",
                        chat_id.0, message_id.0
                    )))
                    .json(&serde_json::json!({ "emoji": emoji })),
            )
            .await?;
        Ok(response.action)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessagePayload, ApiError> {
        self.json(
            self.http
                .put(self.url(&format!(
                    "/chats/{}/messages/{}",
                    chat_id.0, message_id.0
                )))
                .json(&serde_json::json!({ "content": content })),
        )
        .await
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        self.execute(self.http.delete(self.url(&format!(
            "/chats/{}/messages/{}",
            chat_id.0, message_id.0
        ))))
        .await?;
        Ok(())
    }

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ApiError> {
        self.execute(self.http.post(self.url(&format!(
            "/chats/{}/messages/{}/pin",
            chat_id.0, message_id.0
        ))))
        .await?;
        Ok(())
    }

    async fn unpin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ApiError> {
        self.execute(self.http.delete(self.url(&format!(
            "/chats/{}/messages/{}/pin",
            chat_id.0, message_id.0
        ))))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
