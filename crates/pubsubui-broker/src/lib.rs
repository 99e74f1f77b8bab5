//! Broker client capability used by the pubsubui service.
//!
//! # Purpose
//! Defines the per-project [`BrokerClient`] handle the service talks to, plus
//! the [`BrokerConnector`] that builds those handles. Two backends ship here:
//! - [`memory::MemoryBroker`]: an in-process broker for local development and
//!   tests.
//! - [`rest::RestConnector`]: the Pub/Sub v1 HTTP/JSON API (emulator or real
//!   endpoint).
//!
//! # Notes
//! Errors carry a canonical [`Code`] so callers can treat `AlreadyExists` as
//! success when provisioning and map codes onto HTTP statuses when serving.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod rest;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Canonical broker status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Best-effort mapping used when an error body carries no status string.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Code::InvalidArgument,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::NotFound,
            409 => Code::AlreadyExists,
            412 => Code::FailedPrecondition,
            429 => Code::ResourceExhausted,
            499 => Code::Cancelled,
            501 => Code::Unimplemented,
            503 => Code::Unavailable,
            504 => Code::DeadlineExceeded,
            500..=599 => Code::Internal,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BrokerError {
    pub code: Code,
    pub message: String,
}

impl BrokerError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn is_already_exists(&self) -> bool {
        self.code == Code::AlreadyExists
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicRef {
    pub project_id: String,
    pub topic_id: String,
}

impl TopicRef {
    pub fn new(project_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topic_id: topic_id.into(),
        }
    }

    /// Fully-qualified `projects/{project}/topics/{topic}` path.
    pub fn path(&self) -> String {
        format!("projects/{}/topics/{}", self.project_id, self.topic_id)
    }

    /// Parses a fully-qualified topic path; bare ids are rejected.
    pub fn from_path(path: &str) -> Option<Self> {
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("projects"), Some(project), Some("topics"), Some(topic))
                if parts.next().is_none() && !project.is_empty() && !topic.is_empty() =>
            {
                Some(Self::new(project, topic))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionRef {
    pub project_id: String,
    pub subscription_id: String,
    pub topic_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Bytes,
    pub publish_time: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
}

/// Per-project broker handle.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// concurrently from request handlers and provisioning tasks.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn project_id(&self) -> &str;

    async fn create_topic(&self, topic_id: &str) -> Result<TopicRef>;
    async fn topic_exists(&self, topic_id: &str) -> Result<bool>;
    async fn list_topics(&self) -> Result<Vec<TopicRef>>;

    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
    ) -> Result<SubscriptionRef>;
    async fn delete_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Publishes one message and returns the broker-assigned message id.
    async fn publish(&self, topic_id: &str, message: OutboundMessage) -> Result<String>;

    /// Pulls up to `max_messages`. May wait briefly when nothing is available
    /// and return an empty batch.
    async fn pull(&self, subscription_id: &str, max_messages: usize)
    -> Result<Vec<ReceivedMessage>>;
    async fn acknowledge(&self, subscription_id: &str, ack_ids: &[String]) -> Result<()>;
}

/// Builds per-project broker handles.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, project_id: &str) -> Result<Arc<dyn BrokerClient>>;
    fn backend_name(&self) -> &'static str;
}

// Default wait used by backends that long-poll on `pull`.
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_secs(1);
