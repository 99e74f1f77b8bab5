// Broker test double that wraps the in-process backend and injects failures
// or stalls for selected topics and subscriptions.
use async_trait::async_trait;
use parking_lot::Mutex;
use pubsubui_broker::memory::{MemoryBroker, MemoryClient};
use pubsubui_broker::{
    BrokerClient, BrokerError, Code, OutboundMessage, ReceivedMessage, Result, SubscriptionRef,
    TopicRef,
};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Faults {
    pub fail_topics: HashSet<String>,
    pub fail_subscriptions: HashSet<String>,
    pub stall_topics: HashSet<String>,
    pub stall_subscriptions: HashSet<String>,
}

#[derive(Debug)]
pub struct FaultyClient {
    inner: MemoryClient,
    faults: Faults,
    pub attempted_topics: Mutex<Vec<String>>,
    pub attempted_subscriptions: Mutex<Vec<String>>,
}

impl FaultyClient {
    pub fn new(broker: &MemoryBroker, project_id: &str, faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            inner: broker.client(project_id),
            faults,
            attempted_topics: Mutex::new(Vec::new()),
            attempted_subscriptions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BrokerClient for FaultyClient {
    fn project_id(&self) -> &str {
        self.inner.project_id()
    }

    async fn create_topic(&self, topic_id: &str) -> Result<TopicRef> {
        self.attempted_topics.lock().push(topic_id.to_string());
        if self.faults.stall_topics.contains(topic_id) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail_topics.contains(topic_id) {
            return Err(BrokerError::new(Code::PermissionDenied, "topic denied"));
        }
        self.inner.create_topic(topic_id).await
    }

    async fn topic_exists(&self, topic_id: &str) -> Result<bool> {
        self.inner.topic_exists(topic_id).await
    }

    async fn list_topics(&self) -> Result<Vec<TopicRef>> {
        self.inner.list_topics().await
    }

    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
    ) -> Result<SubscriptionRef> {
        self.attempted_subscriptions
            .lock()
            .push(subscription_id.to_string());
        if self.faults.stall_subscriptions.contains(subscription_id) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail_subscriptions.contains(subscription_id) {
            return Err(BrokerError::new(Code::Internal, "subscription broken"));
        }
        self.inner
            .create_subscription(subscription_id, topic_id)
            .await
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<()> {
        self.inner.delete_subscription(subscription_id).await
    }

    async fn publish(&self, topic_id: &str, message: OutboundMessage) -> Result<String> {
        self.inner.publish(topic_id, message).await
    }

    async fn pull(
        &self,
        subscription_id: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        self.inner.pull(subscription_id, max_messages).await
    }

    async fn acknowledge(&self, subscription_id: &str, ack_ids: &[String]) -> Result<()> {
        self.inner.acknowledge(subscription_id, ack_ids).await
    }
}

pub fn set(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Restores an environment variable on drop. Callers must be `#[serial]`.
pub struct EnvGuard {
    key: &'static str,
    prev: Option<String>,
}

impl EnvGuard {
    pub fn set(key: &'static str, value: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe {
            std::env::set_var(key, value);
        }
        Self { key, prev }
    }

    pub fn unset(key: &'static str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe {
            std::env::remove_var(key);
        }
        Self { key, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(value) => unsafe {
                std::env::set_var(self.key, value);
            },
            None => unsafe {
                std::env::remove_var(self.key);
            },
        }
    }
}
