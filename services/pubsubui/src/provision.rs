//! Declarative topic/subscription provisioning.
//!
//! # Purpose
//! Makes the broker's topics and subscriptions match the catalog. Every topic
//! is provisioned concurrently and, per topic, every subscription is
//! provisioned concurrently.
//!
//! # Key invariants
//! - A resource that already exists counts as success, so provisioning is
//!   safe to re-run on every start.
//! - Each creation attempt is bounded by its own timeout; a timeout fails only
//!   that attempt.
//! - Failures never cancel sibling work. All tasks run to completion before
//!   the aggregate result is returned.
//! - Nothing is retried; the retry boundary is a process restart.
use crate::catalog::{Catalog, TopicSpec};
use crate::clients::ClientMap;
use pubsubui_broker::{BrokerClient, BrokerError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

pub const DEFAULT_TOPIC_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionTimeouts {
    pub topic: Duration,
    pub subscription: Duration,
}

impl Default for ProvisionTimeouts {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC_TIMEOUT,
            subscription: DEFAULT_SUBSCRIPTION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    AlreadyExisted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub topics: usize,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no client configured for project {project_id:?}")]
    MissingClient { project_id: String },
    #[error("could not create topic {topic:?} in project {project_id:?}: {source}")]
    Topic {
        project_id: String,
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("timed out after {timeout:?} creating topic {topic:?} in project {project_id:?}")]
    TopicTimeout {
        project_id: String,
        topic: String,
        timeout: Duration,
    },
    #[error(
        "could not create subscription {subscription:?} for topic {topic:?} in project {project_id:?}: {source}"
    )]
    Subscription {
        project_id: String,
        topic: String,
        subscription: String,
        #[source]
        source: BrokerError,
    },
    #[error(
        "timed out after {timeout:?} creating subscription {subscription:?} for topic {topic:?} in project {project_id:?}"
    )]
    SubscriptionTimeout {
        project_id: String,
        topic: String,
        subscription: String,
        timeout: Duration,
    },
    #[error(
        "could not create subscriptions for topic {topic:?} in project {project_id:?}: {}",
        join_failures(.failures)
    )]
    Subscriptions {
        project_id: String,
        topic: String,
        failures: Vec<ProvisionError>,
    },
    #[error("provisioning task failed: {0}")]
    Task(String),
}

impl ProvisionError {
    /// Configuration-class failures cannot be fixed by restarting.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProvisionError::MissingClient { .. })
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            ProvisionError::Topic { topic, .. }
            | ProvisionError::TopicTimeout { topic, .. }
            | ProvisionError::Subscription { topic, .. }
            | ProvisionError::SubscriptionTimeout { topic, .. }
            | ProvisionError::Subscriptions { topic, .. } => Some(topic),
            ProvisionError::MissingClient { .. } | ProvisionError::Task(_) => None,
        }
    }
}

fn join_failures(failures: &[ProvisionError]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn record(kind: &'static str, outcome: &'static str) {
    metrics::counter!("pubsubui_provision_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

pub async fn ensure_subscription(
    client: &dyn BrokerClient,
    project_id: &str,
    topic: &str,
    subscription: &str,
    timeout: Duration,
) -> Result<Outcome, ProvisionError> {
    tracing::info!(project_id, topic, subscription, "creating subscription");
    let attempt = tokio::time::timeout(timeout, client.create_subscription(subscription, topic));
    match attempt.await {
        Ok(Ok(_)) => {
            tracing::info!(project_id, topic, subscription, "subscription created");
            record("subscription", "created");
            Ok(Outcome::Created)
        }
        Ok(Err(err)) if err.is_already_exists() => {
            tracing::info!(project_id, topic, subscription, "subscription already exists");
            record("subscription", "already_exists");
            Ok(Outcome::AlreadyExisted)
        }
        Ok(Err(source)) => {
            record("subscription", "failed");
            Err(ProvisionError::Subscription {
                project_id: project_id.to_string(),
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                source,
            })
        }
        Err(_) => {
            tracing::warn!(project_id, topic, subscription, ?timeout, "subscription creation timed out");
            record("subscription", "timeout");
            Err(ProvisionError::SubscriptionTimeout {
                project_id: project_id.to_string(),
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                timeout,
            })
        }
    }
}

/// Creates the topic, then every subscription of `spec` concurrently.
///
/// # Errors
/// - Topic creation failure or timeout (subscriptions are not attempted).
/// - `Subscriptions` naming every subscription that failed.
pub async fn ensure_topic(
    client: Arc<dyn BrokerClient>,
    spec: &TopicSpec,
    timeouts: ProvisionTimeouts,
) -> Result<Outcome, ProvisionError> {
    let project_id = spec.project_id.as_str();
    let topic = spec.name.as_str();
    tracing::info!(project_id, topic, "creating topic");
    let outcome = match tokio::time::timeout(timeouts.topic, client.create_topic(topic)).await {
        Ok(Ok(_)) => {
            tracing::info!(project_id, topic, "topic created");
            record("topic", "created");
            Outcome::Created
        }
        Ok(Err(err)) if err.is_already_exists() => {
            tracing::info!(project_id, topic, "topic already exists");
            record("topic", "already_exists");
            Outcome::AlreadyExisted
        }
        Ok(Err(source)) => {
            record("topic", "failed");
            return Err(ProvisionError::Topic {
                project_id: project_id.to_string(),
                topic: topic.to_string(),
                source,
            });
        }
        Err(_) => {
            tracing::warn!(project_id, topic, timeout = ?timeouts.topic, "topic creation timed out");
            record("topic", "timeout");
            return Err(ProvisionError::TopicTimeout {
                project_id: project_id.to_string(),
                topic: topic.to_string(),
                timeout: timeouts.topic,
            });
        }
    };

    let mut tasks = JoinSet::new();
    for subscription in &spec.subscriptions {
        let client = Arc::clone(&client);
        let project_id = project_id.to_string();
        let topic = topic.to_string();
        let subscription = subscription.clone();
        let timeout = timeouts.subscription;
        tasks.spawn(async move {
            ensure_subscription(client.as_ref(), &project_id, &topic, &subscription, timeout).await
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => failures.push(err),
            Err(err) => failures.push(ProvisionError::Task(err.to_string())),
        }
    }
    if failures.is_empty() {
        Ok(outcome)
    } else {
        Err(ProvisionError::Subscriptions {
            project_id: project_id.to_string(),
            topic: topic.to_string(),
            failures,
        })
    }
}

/// Provisions every topic in the catalog.
///
/// Every topic's client is resolved before any work starts, so a catalog that
/// references an unknown project fails without touching the broker. Once
/// started, all topic tasks run to completion; the first failure observed is
/// returned and the rest are logged.
pub async fn provision_all(
    clients: &ClientMap,
    catalog: &Catalog,
    timeouts: ProvisionTimeouts,
) -> Result<ProvisionSummary, ProvisionError> {
    if catalog.is_empty() {
        tracing::info!("no topics configured, skipping provisioning");
        return Ok(ProvisionSummary::default());
    }

    let mut work = Vec::with_capacity(catalog.topics.len());
    for spec in &catalog.topics {
        let client = clients
            .get(&spec.project_id)
            .cloned()
            .ok_or_else(|| ProvisionError::MissingClient {
                project_id: spec.project_id.clone(),
            })?;
        work.push((client, spec.clone()));
    }

    tracing::info!(topics = work.len(), "provisioning topics from catalog");
    let mut tasks = JoinSet::new();
    for (client, spec) in work {
        tasks.spawn(async move { ensure_topic(client, &spec, timeouts).await });
    }

    let mut first_failure = None;
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|err| Err(ProvisionError::Task(err.to_string())));
        if let Err(err) = result {
            failed += 1;
            tracing::error!(error = %err, "topic provisioning failed");
            if first_failure.is_none() {
                first_failure = Some(err);
            }
        }
    }

    match first_failure {
        Some(err) => {
            tracing::error!(failed, total = catalog.topics.len(), "provisioning incomplete");
            Err(err)
        }
        None => {
            tracing::info!(topics = catalog.topics.len(), "all topics provisioned");
            Ok(ProvisionSummary {
                topics: catalog.topics.len(),
            })
        }
    }
}
