// In-process broker backend.
// Topics and subscriptions are namespaced per project. Publishing copies the
// message into every subscription attached to the topic; pulled messages stay
// outstanding until acknowledged and are redelivered once their ack deadline
// passes.
use crate::{
    BrokerClient, BrokerConnector, BrokerError, DEFAULT_PULL_WAIT, OutboundMessage,
    ReceivedMessage, Result, SubscriptionRef, TopicRef,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    data: Bytes,
    publish_time: DateTime<Utc>,
    attributes: HashMap<String, String>,
}

#[derive(Debug)]
struct Outstanding {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug)]
struct SubscriptionState {
    topic_id: String,
    // Messages waiting to be pulled, oldest first.
    backlog: VecDeque<StoredMessage>,
    // Pulled but not yet acknowledged, keyed by ack id.
    outstanding: HashMap<String, Outstanding>,
    notify: Arc<Notify>,
}

impl SubscriptionState {
    fn new(topic_id: String) -> Self {
        Self {
            topic_id,
            backlog: VecDeque::new(),
            outstanding: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Moves messages past their ack deadline back to the head of the
    /// backlog in publish order.
    fn requeue_expired(&mut self, now: Instant) {
        let expired_ids: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        let mut expired: Vec<StoredMessage> = expired_ids
            .iter()
            .filter_map(|ack_id| self.outstanding.remove(ack_id))
            .map(|entry| entry.message)
            .collect();
        // Ids are a per-broker counter, so numeric order is publish order.
        expired.sort_by_cached_key(|message| {
            (message.message_id.parse::<u64>().ok(), message.message_id.clone())
        });
        for message in expired.into_iter().rev() {
            self.backlog.push_front(message);
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    // (project, topic)
    topics: HashSet<(String, String)>,
    // (project, subscription) -> state
    subscriptions: HashMap<(String, String), SubscriptionState>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BrokerState>,
    next_message_id: AtomicU64,
    next_ack_id: AtomicU64,
    pull_wait: Duration,
    ack_deadline: Duration,
}

/// Shared in-process broker. Cloning yields another handle to the same state.
///
/// ```rust
/// use pubsubui_broker::memory::MemoryBroker;
/// use pubsubui_broker::{BrokerClient, OutboundMessage};
///
/// tokio::runtime::Runtime::new().unwrap().block_on(async {
///     let broker = MemoryBroker::new();
///     let client = broker.client("p1");
///     client.create_topic("orders").await.expect("topic");
///     client.create_subscription("audit", "orders").await.expect("sub");
///     client
///         .publish("orders", OutboundMessage::new("hello"))
///         .await
///         .expect("publish");
///     let pulled = client.pull("audit", 10).await.expect("pull");
///     assert_eq!(pulled[0].data.as_ref(), b"hello");
/// });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_PULL_WAIT, DEFAULT_ACK_DEADLINE)
    }

    pub fn with_timing(pull_wait: Duration, ack_deadline: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                next_message_id: AtomicU64::new(1),
                next_ack_id: AtomicU64::new(1),
                pull_wait,
                ack_deadline,
            }),
        }
    }

    pub fn client(&self, project_id: impl Into<String>) -> MemoryClient {
        MemoryClient {
            project_id: project_id.into(),
            broker: self.clone(),
        }
    }

    pub fn subscription_count(&self, project_id: &str) -> usize {
        self.inner
            .state
            .lock()
            .subscriptions
            .keys()
            .filter(|(project, _)| project == project_id)
            .count()
    }

    pub fn has_subscription(&self, project_id: &str, subscription_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .subscriptions
            .contains_key(&(project_id.to_string(), subscription_id.to_string()))
    }

    /// Messages pulled but not yet acknowledged on a subscription.
    pub fn outstanding(&self, project_id: &str, subscription_id: &str) -> usize {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(&(project_id.to_string(), subscription_id.to_string()))
            .map(|sub| sub.outstanding.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, project_id: &str) -> Result<Arc<dyn BrokerClient>> {
        Ok(Arc::new(self.client(project_id)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug, Clone)]
pub struct MemoryClient {
    project_id: String,
    broker: MemoryBroker,
}

impl MemoryClient {
    fn key(&self, id: &str) -> (String, String) {
        (self.project_id.clone(), id.to_string())
    }

    fn try_take(&self, subscription_id: &str, max_messages: usize) -> Result<TakeOutcome> {
        let mut state = self.broker.inner.state.lock();
        let sub = state
            .subscriptions
            .get_mut(&self.key(subscription_id))
            .ok_or_else(|| {
                BrokerError::not_found(format!("subscription {subscription_id} not found"))
            })?;
        let now = Instant::now();
        sub.requeue_expired(now);
        if sub.backlog.is_empty() {
            return Ok(TakeOutcome::Empty(Arc::clone(&sub.notify)));
        }
        let mut out = Vec::new();
        while out.len() < max_messages {
            let Some(message) = sub.backlog.pop_front() else {
                break;
            };
            let ack_id = format!(
                "{}-{}",
                subscription_id,
                self.broker.inner.next_ack_id.fetch_add(1, Ordering::Relaxed)
            );
            out.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: message.message_id.clone(),
                data: message.data.clone(),
                publish_time: message.publish_time,
                attributes: message.attributes.clone(),
            });
            sub.outstanding.insert(
                ack_id,
                Outstanding {
                    message,
                    deadline: now + self.broker.inner.ack_deadline,
                },
            );
        }
        Ok(TakeOutcome::Taken(out))
    }
}

enum TakeOutcome {
    Taken(Vec<ReceivedMessage>),
    Empty(Arc<Notify>),
}

#[async_trait]
impl BrokerClient for MemoryClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn create_topic(&self, topic_id: &str) -> Result<TopicRef> {
        let mut state = self.broker.inner.state.lock();
        if !state.topics.insert(self.key(topic_id)) {
            return Err(BrokerError::already_exists(format!(
                "topic {topic_id} already exists"
            )));
        }
        Ok(TopicRef::new(self.project_id.clone(), topic_id))
    }

    async fn topic_exists(&self, topic_id: &str) -> Result<bool> {
        Ok(self
            .broker
            .inner
            .state
            .lock()
            .topics
            .contains(&self.key(topic_id)))
    }

    async fn list_topics(&self) -> Result<Vec<TopicRef>> {
        let state = self.broker.inner.state.lock();
        let mut topics: Vec<TopicRef> = state
            .topics
            .iter()
            .filter(|(project, _)| *project == self.project_id)
            .map(|(project, topic)| TopicRef::new(project.clone(), topic.clone()))
            .collect();
        topics.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
        Ok(topics)
    }

    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
    ) -> Result<SubscriptionRef> {
        let mut state = self.broker.inner.state.lock();
        if !state.topics.contains(&self.key(topic_id)) {
            return Err(BrokerError::not_found(format!("topic {topic_id} not found")));
        }
        let key = self.key(subscription_id);
        if state.subscriptions.contains_key(&key) {
            return Err(BrokerError::already_exists(format!(
                "subscription {subscription_id} already exists"
            )));
        }
        state
            .subscriptions
            .insert(key, SubscriptionState::new(topic_id.to_string()));
        Ok(SubscriptionRef {
            project_id: self.project_id.clone(),
            subscription_id: subscription_id.to_string(),
            topic_id: topic_id.to_string(),
        })
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<()> {
        let removed = self
            .broker
            .inner
            .state
            .lock()
            .subscriptions
            .remove(&self.key(subscription_id));
        match removed {
            Some(sub) => {
                // Wake pullers so they observe the deletion.
                sub.notify.notify_waiters();
                Ok(())
            }
            None => Err(BrokerError::not_found(format!(
                "subscription {subscription_id} not found"
            ))),
        }
    }

    async fn publish(&self, topic_id: &str, message: OutboundMessage) -> Result<String> {
        let mut state = self.broker.inner.state.lock();
        if !state.topics.contains(&self.key(topic_id)) {
            return Err(BrokerError::not_found(format!("topic {topic_id} not found")));
        }
        let message_id = self
            .broker
            .inner
            .next_message_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let stored = StoredMessage {
            message_id: message_id.clone(),
            data: message.data,
            publish_time: Utc::now(),
            attributes: message.attributes,
        };
        for ((project, _), sub) in state.subscriptions.iter_mut() {
            if *project == self.project_id && sub.topic_id == topic_id {
                sub.backlog.push_back(stored.clone());
                sub.notify.notify_waiters();
            }
        }
        Ok(message_id)
    }

    async fn pull(
        &self,
        subscription_id: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        let max_messages = max_messages.max(1);
        let notify = match self.try_take(subscription_id, max_messages)? {
            TakeOutcome::Taken(messages) => return Ok(messages),
            TakeOutcome::Empty(notify) => notify,
        };
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        // A publish may have landed between the check and registering the waiter.
        if let TakeOutcome::Taken(messages) = self.try_take(subscription_id, max_messages)? {
            return Ok(messages);
        }
        let _ = tokio::time::timeout(self.broker.inner.pull_wait, notified).await;
        match self.try_take(subscription_id, max_messages)? {
            TakeOutcome::Taken(messages) => Ok(messages),
            TakeOutcome::Empty(_) => Ok(Vec::new()),
        }
    }

    async fn acknowledge(&self, subscription_id: &str, ack_ids: &[String]) -> Result<()> {
        let mut state = self.broker.inner.state.lock();
        let sub = state
            .subscriptions
            .get_mut(&self.key(subscription_id))
            .ok_or_else(|| {
                BrokerError::not_found(format!("subscription {subscription_id} not found"))
            })?;
        for ack_id in ack_ids {
            sub.outstanding.remove(ack_id);
        }
        Ok(())
    }
}
