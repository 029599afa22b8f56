use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use shared::protocol::ClientEvent;
use tokio::sync::broadcast;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotification {
    Connected,
    Disconnected,
    Event { name: String, data: Value },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Emits one event on the event channel. Never blocks and never queues
    /// across a reconnect: a disconnected channel refuses the event.
    fn send(&self, event: &ClientEvent) -> Result<(), EngineError>;

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<TransportNotification>;

    fn is_connected(&self) -> bool;
}
