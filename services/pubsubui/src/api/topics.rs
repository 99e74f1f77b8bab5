//! Topic handlers: create, paginated listing and publish.
//!
//! # Notes
//! Listing reads the broker once per project and serves later pages from the
//! topic cache; topics created through the API are appended to that cache.
use crate::api::error::{ApiError, api_bad_request, api_broker};
use crate::api::types::{
    CreateTopicRequest, CreateTopicResponse, ListTopicsQuery, ListTopicsResponse,
    PublishMessageResponse, Topic,
};
use crate::api::{client_for, describe_topic};
use crate::app::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use pubsubui_broker::OutboundMessage;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 10;

fn parse_positive(value: Option<&str>, default: usize, label: &str) -> Result<usize, ApiError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().parse::<usize>() {
        Ok(parsed) if parsed >= 1 => Ok(parsed),
        _ => Err(api_bad_request(&format!("invalid {label} {raw:?}"))),
    }
}

/// Slices one page out of `topics`. Pages past the end are empty.
pub(crate) fn paginate(
    project_id: &str,
    topics: Vec<Topic>,
    page: usize,
    page_size: usize,
) -> ListTopicsResponse {
    let total_items = topics.len();
    let total_pages = total_items.div_ceil(page_size);
    let offset = (page - 1).saturating_mul(page_size).min(total_items);
    let limit = offset.saturating_add(page_size).min(total_items);
    ListTopicsResponse {
        project_id: project_id.to_string(),
        topics: topics[offset..limit].to_vec(),
        total_items,
        page,
        page_size,
        total_pages,
    }
}

pub(crate) async fn create_topic(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    payload: Result<Json<CreateTopicRequest>, JsonRejection>,
) -> Result<Json<CreateTopicResponse>, ApiError> {
    let client = client_for(&state, &project_id)?;
    let Json(request) =
        payload.map_err(|_| api_bad_request("could not decode create topic request"))?;
    if request.name.trim().is_empty() {
        return Err(api_bad_request("topic name must not be empty"));
    }

    let created = client
        .create_topic(&request.name)
        .await
        .map_err(|err| api_broker("create topic", &err))?;
    tracing::info!(project_id = %project_id, topic = %created.topic_id, "topic created");

    let topic = describe_topic(&state, &project_id, &created.topic_id);
    state.topics.add(topic.clone());
    Ok(Json(CreateTopicResponse { topic }))
}

pub(crate) async fn list_topics(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<ListTopicsQuery>,
) -> Result<Json<ListTopicsResponse>, ApiError> {
    let page = parse_positive(query.page.as_deref(), DEFAULT_PAGE, "page")?;
    let page_size = parse_positive(query.page_size.as_deref(), DEFAULT_PAGE_SIZE, "page size")?;
    let client = client_for(&state, &project_id)?;

    let topics = match state.topics.get(&project_id) {
        Some(topics) => topics,
        None => {
            let listed = client
                .list_topics()
                .await
                .map_err(|err| api_broker("list topics", &err))?;
            let topics = listed
                .iter()
                .map(|topic| describe_topic(&state, &project_id, &topic.topic_id))
                .collect();
            state.topics.fill(&project_id, topics)
        }
    };

    Ok(Json(paginate(&project_id, topics, page, page_size)))
}

pub(crate) async fn publish(
    State(state): State<AppState>,
    Path((project_id, topic_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<PublishMessageResponse>, ApiError> {
    let client = client_for(&state, &project_id)?;
    let message_id = client
        .publish(&topic_id, OutboundMessage::new(body))
        .await
        .map_err(|err| api_broker("publish message", &err))?;
    metrics::counter!("pubsubui_published_messages_total").increment(1);
    tracing::debug!(project_id = %project_id, topic = %topic_id, message_id = %message_id, "message published");
    Ok(Json(PublishMessageResponse {
        project_id,
        message_id,
    }))
}
