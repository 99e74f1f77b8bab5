//! HTTP API module.
//!
//! # Purpose
//! Route handlers for projects, topics, subscriptions and live message
//! streams, plus the shared lookups every project-scoped handler performs.
pub mod error;
pub mod projects;
pub mod stream;
pub mod subscriptions;
pub mod system;
pub mod topics;
pub mod types;

use crate::api::error::{ApiError, api_not_servable};
use crate::api::types::Topic;
use crate::app::AppState;
use crate::catalog::topic_key;
use pubsubui_broker::BrokerClient;
use std::sync::Arc;

/// Resolves the broker client for `project_id`, or the error the caller
/// should see while the pool is pending or lacks the project.
pub(crate) fn client_for(
    state: &AppState,
    project_id: &str,
) -> Result<Arc<dyn BrokerClient>, ApiError> {
    state
        .readiness
        .client(project_id)
        .map_err(|reason| api_not_servable(project_id, reason))
}

/// Builds the API view of a topic, enriched with catalog payloads.
pub(crate) fn describe_topic(state: &AppState, project_id: &str, topic_id: &str) -> Topic {
    Topic {
        id: topic_id.to_string(),
        name: topic_id.to_string(),
        project_id: project_id.to_string(),
        payloads: state.readiness.payloads_for(&topic_key(project_id, topic_id)),
    }
}
