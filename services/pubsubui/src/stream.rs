//! Per-stream live delivery.
//!
//! # Purpose
//! Moves messages from a temporary broker subscription into one client's
//! server-sent event channel.
//!
//! # Key invariants
//! - A message is acknowledged only after its event was handed to the
//!   client's channel.
//! - Client disconnect or hub shutdown stops pulling immediately; the
//!   temporary subscription is deleted on every exit path.
//! - The loop only writes to its own channel and never touches hub
//!   membership beyond holding its [`ClientHandle`].
use crate::hub::ClientHandle;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use pubsubui_broker::{BrokerClient, BrokerError, ReceivedMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events buffered between the delivery task and the HTTP response body.
pub const STREAM_BUFFER: usize = 32;
pub const PULL_BATCH: usize = 10;

pub type EventSender = mpsc::Sender<Result<Event, Infallible>>;

pub fn temp_subscription_name(topic: &str) -> String {
    format!("{topic}_pubsubui_{}", Uuid::new_v4().simple())
}

/// Temporary subscription owned by a request until a delivery task takes it
/// over. Dropped while still owned, it is deleted in the background.
pub struct TempSubscription {
    client: Arc<dyn BrokerClient>,
    name: Option<String>,
}

impl TempSubscription {
    pub async fn create(client: Arc<dyn BrokerClient>, topic: &str) -> Result<Self, BrokerError> {
        let name = temp_subscription_name(topic);
        client.create_subscription(&name, topic).await?;
        Ok(Self {
            client,
            name: Some(name),
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Deletes the subscription and waits for the broker to answer.
    pub async fn delete(mut self) {
        if let Some(name) = self.name.take() {
            delete_temp_subscription(self.client.as_ref(), &name).await;
        }
    }

    /// Gives up ownership; the caller is now responsible for deletion.
    pub fn into_name(mut self) -> String {
        self.name.take().unwrap_or_default()
    }
}

impl Drop for TempSubscription {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let client = Arc::clone(&self.client);
                runtime.spawn(async move {
                    delete_temp_subscription(client.as_ref(), &name).await;
                });
            }
            Err(_) => {
                tracing::warn!(subscription = %name, "no runtime left to delete abandoned temporary subscription")
            }
        }
    }
}

async fn delete_temp_subscription(client: &dyn BrokerClient, name: &str) {
    if let Err(err) = client.delete_subscription(name).await {
        tracing::warn!(subscription = %name, error = %err, "could not delete temporary subscription");
    }
}

/// JSON body of one `message` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub data: serde_json::Value,
    pub publish_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl WireMessage {
    /// Payloads that are valid JSON are embedded as-is; anything else is
    /// carried as a (lossy UTF-8) string.
    pub fn from_received(message: &ReceivedMessage) -> Self {
        let data = serde_json::from_slice(&message.data).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&message.data).into_owned())
        });
        Self {
            id: message.message_id.clone(),
            data,
            publish_time: message.publish_time,
            attributes: message.attributes.clone(),
        }
    }
}

pub fn to_event(message: &ReceivedMessage) -> Result<Event, axum::Error> {
    let mut event = Event::default().event("message");
    // SSE ids cannot carry line breaks or NUL.
    if !message.message_id.contains(['\n', '\r', '\0']) {
        event = event.id(&message.message_id);
    }
    event.json_data(WireMessage::from_received(message))
}

#[derive(Debug)]
pub enum StreamEnd {
    ClientDisconnected,
    HubClosed,
    Broker(BrokerError),
}

impl StreamEnd {
    fn label(&self) -> &'static str {
        match self {
            StreamEnd::ClientDisconnected => "client_disconnected",
            StreamEnd::HubClosed => "hub_closed",
            StreamEnd::Broker(_) => "broker_error",
        }
    }
}

pub struct StreamSession {
    pub client: Arc<dyn BrokerClient>,
    pub topic: String,
    pub subscription: String,
    pub handle: ClientHandle,
}

pub async fn run_delivery(session: StreamSession, tx: EventSender) -> StreamEnd {
    let StreamSession {
        client,
        topic,
        subscription,
        mut handle,
    } = session;
    let project_id = client.project_id().to_string();
    tracing::info!(
        project_id = %project_id,
        topic = %topic,
        subscription = %subscription,
        client_id = handle.id(),
        "stream started"
    );
    metrics::gauge!("pubsubui_streams_active").increment(1.0);

    let end = 'deliver: loop {
        let pulled = tokio::select! {
            biased;
            _ = handle.closed() => break 'deliver StreamEnd::HubClosed,
            _ = tx.closed() => break 'deliver StreamEnd::ClientDisconnected,
            pulled = client.pull(&subscription, PULL_BATCH) => pulled,
        };
        let messages = match pulled {
            Ok(messages) => messages,
            Err(err) => break 'deliver StreamEnd::Broker(err),
        };

        for message in messages {
            let event = match to_event(&message) {
                Ok(event) => event,
                Err(err) => {
                    // Left unacknowledged.
                    tracing::warn!(message_id = %message.message_id, error = %err, "could not encode message event");
                    continue;
                }
            };
            tokio::select! {
                biased;
                _ = handle.closed() => break 'deliver StreamEnd::HubClosed,
                sent = tx.send(Ok(event)) => {
                    if sent.is_err() {
                        break 'deliver StreamEnd::ClientDisconnected;
                    }
                }
            }
            metrics::counter!("pubsubui_stream_messages_total").increment(1);
            if let Err(err) = client
                .acknowledge(&subscription, std::slice::from_ref(&message.ack_id))
                .await
            {
                tracing::warn!(message_id = %message.message_id, error = %err, "acknowledge failed");
            }
        }
    };

    match &end {
        StreamEnd::Broker(err) => {
            tracing::warn!(subscription = %subscription, error = %err, "stream ended by broker error")
        }
        other => tracing::info!(subscription = %subscription, reason = other.label(), "stream ended"),
    }
    metrics::gauge!("pubsubui_streams_active").decrement(1.0);

    delete_temp_subscription(client.as_ref(), &subscription).await;
    // `handle` drops here and leaves the hub.
    end
}
