//! REST access to the server.
//!
//! [`ChatApi`] is the seam the synchronization store depends on;
//! [`HttpApi`] implements it with `reqwest`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use parley_shared::models::{
    Attachment, Chat, Message, NewMessage, ReconciliationBatch, StatusReceipt,
};
use parley_shared::types::{ChatId, MessageId, UserId};
use parley_shared::MessageStatus;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_chat(&self, a: UserId, b: UserId) -> Result<Chat>;

    async fn chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>>;

    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>>;

    /// Ask the server to promote a message. Never moves it backwards.
    async fn update_status(&self, message_id: MessageId, status: MessageStatus)
        -> Result<StatusReceipt>;

    async fn delete_message(&self, message_id: MessageId) -> Result<Message>;

    async fn reconcile(&self, user_id: UserId) -> Result<ReconciliationBatch>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatBody {
    user1_id: UserId,
    user2_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    message_id: MessageId,
    new_status: MessageStatus,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    config: ClientConfig,
}

impl HttpApi {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turn non-2xx responses into [`ClientError::Server`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn create_chat(&self, a: UserId, b: UserId) -> Result<Chat> {
        let body = CreateChatBody {
            user1_id: a,
            user2_id: b,
        };
        self.send(self.client.post(self.config.endpoint("/api/chats")).json(&body))
            .await
    }

    async fn chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        let url = self.config.endpoint(&format!("/api/chats/user/{user_id}"));
        self.send(self.client.get(url)).await
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.send(self.client.post(self.config.endpoint("/api/messages")).json(&new))
            .await
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let url = self.config.endpoint(&format!("/api/messages/{chat_id}"));
        self.send(self.client.get(url)).await
    }

    async fn update_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusReceipt> {
        let body = StatusBody {
            message_id,
            new_status: status,
        };
        let url = self.config.endpoint("/api/messages/status");
        self.send(self.client.patch(url).json(&body)).await
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<Message> {
        let url = self.config.endpoint(&format!("/api/messages/{message_id}"));
        self.send(self.client.delete(url)).await
    }

    async fn reconcile(&self, user_id: UserId) -> Result<ReconciliationBatch> {
        let url = self.config.endpoint(&format!("/api/sessions/{user_id}/reconcile"));
        self.send(self.client.post(url)).await
    }
}

/// Fields for a message about to be sent.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }
}
