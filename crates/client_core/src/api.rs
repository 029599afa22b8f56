use std::{sync::Arc, time::Duration};

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{ConversationId, MemberId, MessageId},
    protocol::{CreateChatRequest, CreateChatResponse, MarkReadRequest, Member, Message},
};

use crate::{error::EngineError, transport::Transport};

#[derive(Clone)]
pub struct RestApi {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RestApi {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub async fn list_users(&self) -> Result<Vec<Member>, EngineError> {
        self.call(Method::GET, "/api/users".to_string(), None::<()>)
            .await
    }

    pub async fn list_messages(&self) -> Result<Vec<Message>, EngineError> {
        self.call(Method::GET, "/api/messages".to_string(), None::<()>)
            .await
    }

    pub async fn create_chat(
        &self,
        user_id1: MemberId,
        user_id2: MemberId,
    ) -> Result<ConversationId, EngineError> {
        let response: CreateChatResponse = self
            .call(
                Method::POST,
                "/api/chats".to_string(),
                Some(CreateChatRequest { user_id1, user_id2 }),
            )
            .await?;
        Ok(response.chat_id)
    }

    pub async fn chat_history(
        &self,
        chat_id: &ConversationId,
    ) -> Result<Vec<Message>, EngineError> {
        self.call(
            Method::GET,
            format!("/api/chats/{chat_id}/messages"),
            None::<()>,
        )
        .await
    }

    pub async fn mark_read(
        &self,
        chat_id: &ConversationId,
        user_id: MemberId,
    ) -> Result<(), EngineError> {
        self.call_ignoring_body(
            Method::POST,
            format!("/api/chats/{chat_id}/read"),
            Some(MarkReadRequest { user_id }),
        )
        .await
    }

    pub async fn delete_user(&self, user_id: &MemberId) -> Result<(), EngineError> {
        self.call_ignoring_body(Method::DELETE, format!("/api/users/{user_id}"), None::<()>)
            .await
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<(), EngineError> {
        self.call_ignoring_body(
            Method::DELETE,
            format!("/api/messages/{message_id}"),
            None::<()>,
        )
        .await
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: String,
        body: Option<B>,
    ) -> Result<T, EngineError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let value = self.raw(method.clone(), &path, body).await?;
        serde_json::from_value(value).map_err(|err| {
            EngineError::request_failed(method.as_str(), path, format!("invalid response: {err}"))
        })
    }

    async fn call_ignoring_body<B: Serialize>(
        &self,
        method: Method,
        path: String,
        body: Option<B>,
    ) -> Result<(), EngineError> {
        self.raw(method, &path, body).await.map(|_| ())
    }

    async fn raw<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<Value, EngineError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| EngineError::request_failed(method.as_str(), path, err))?;

        match tokio::time::timeout(
            self.timeout,
            self.transport.request(method.clone(), path, body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::RequestFailed {
                method: method.to_string(),
                path: path.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
                timed_out: true,
            }),
        }
    }
}
