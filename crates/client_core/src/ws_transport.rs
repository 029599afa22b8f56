use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Method};
use serde_json::Value;
use shared::protocol::{ClientEvent, Frame};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    error::EngineError,
    transport::{Transport, TransportNotification},
};

pub struct WsTransport {
    http: Client,
    server_url: String,
    ws_url: String,
    reconnect_delay: Duration,
    connected: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
    notifications: broadcast::Sender<TransportNotification>,
}

impl WsTransport {
    pub fn connect(settings: &Settings) -> anyhow::Result<(Arc<Self>, JoinHandle<()>)> {
        let (transport, outbound) = Self::build(settings)?;
        let task = tokio::spawn(Arc::clone(&transport).run(outbound));
        Ok((transport, task))
    }

    fn build(settings: &Settings) -> anyhow::Result<(Arc<Self>, mpsc::UnboundedReceiver<String>)> {
        let ws_url = settings.ws_url()?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(settings.update_buffer.max(16));
        let transport = Arc::new(Self {
            http: Client::new(),
            server_url: settings.server_url.trim_end_matches('/').to_string(),
            ws_url,
            reconnect_delay: settings.reconnect_delay(),
            connected: AtomicBool::new(false),
            outbound,
            notifications,
        });
        Ok((transport, outbound_rx))
    }

    async fn run(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<String>) {
        loop {
            match connect_async(self.ws_url.as_str()).await {
                Ok((stream, _)) => {
                    while let Ok(stale) = outbound.try_recv() {
                        warn!(frame = %stale, "ws: dropping frame queued while disconnected");
                    }
                    self.set_connected(true);
                    let (mut writer, mut reader) = stream.split();
                    loop {
                        tokio::select! {
                            incoming = reader.next() => match incoming {
                                Some(Ok(WsMessage::Text(text))) => self.publish_frame(&text),
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(err)) => {
                                    warn!(%err, "ws: receive failed");
                                    break;
                                }
                            },
                            frame = outbound.recv() => {
                                let Some(frame) = frame else {
                                    let _ = writer.close().await;
                                    self.set_connected(false);
                                    return;
                                };
                                if let Err(err) = writer.send(WsMessage::Text(frame)).await {
                                    warn!(%err, "ws: send failed");
                                    break;
                                }
                            }
                        }
                    }
                    self.set_connected(false);
                }
                Err(err) => warn!(url = %self.ws_url, %err, "ws: connect failed"),
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        info!(connected, url = %self.ws_url, "ws: connection changed");
        let notification = if connected {
            TransportNotification::Connected
        } else {
            TransportNotification::Disconnected
        };
        let _ = self.notifications.send(notification);
    }

    fn publish_frame(&self, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => {
                let _ = self.notifications.send(TransportNotification::Event {
                    name: frame.event,
                    data: frame.data,
                });
            }
            Err(err) => warn!(%err, "ws: dropping undecodable frame"),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn send(&self, event: &ClientEvent) -> Result<(), EngineError> {
        let unavailable = EngineError::TransportUnavailable {
            event: event.name(),
        };
        if !self.is_connected() {
            return Err(unavailable);
        }
        let frame = serde_json::to_string(event).map_err(|err| EngineError::MalformedEvent {
            event: event.name().to_string(),
            reason: err.to_string(),
        })?;
        debug!(event = event.name(), "ws: send");
        self.outbound.send(frame).map_err(|_| unavailable)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, EngineError> {
        let url = format!("{}{path}", self.server_url);
        let fail = |reason: &dyn ToString| {
            EngineError::request_failed(method.as_str(), path, reason.to_string())
        };

        let mut builder = self.http.request(method.clone(), &url);
        if let Some(body) = &body {
            builder = builder.json(body);
        }
        let text = builder
            .send()
            .await
            .map_err(|err| fail(&err))?
            .error_for_status()
            .map_err(|err| fail(&err))?
            .text()
            .await
            .map_err(|err| fail(&err))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| fail(&err))
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportNotification> {
        self.notifications.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "tests/ws_transport_tests.rs"]
mod tests;
