use crate::api::client_for;
use crate::api::error::{ApiError, api_bad_request, api_broker};
use crate::api::types::{CreateSubscriptionRequest, CreateSubscriptionResponse, Subscription};
use crate::app::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};

pub(crate) async fn create_subscription(
    State(state): State<AppState>,
    Path((project_id, topic_id)): Path<(String, String)>,
    payload: Result<Json<CreateSubscriptionRequest>, JsonRejection>,
) -> Result<Json<CreateSubscriptionResponse>, ApiError> {
    let client = client_for(&state, &project_id)?;
    let Json(request) =
        payload.map_err(|_| api_bad_request("could not decode create subscription request"))?;
    if request.name.trim().is_empty() {
        return Err(api_bad_request("subscription name must not be empty"));
    }

    let exists = client
        .topic_exists(&topic_id)
        .await
        .map_err(|err| api_broker("check topic", &err))?;
    if !exists {
        return Err(api_bad_request(&format!("topic {topic_id:?} does not exist")));
    }

    let created = client
        .create_subscription(&request.name, &topic_id)
        .await
        .map_err(|err| api_broker("create subscription", &err))?;
    tracing::info!(
        project_id = %project_id,
        topic = %topic_id,
        subscription = %created.subscription_id,
        "subscription created"
    );

    Ok(Json(CreateSubscriptionResponse {
        subscription: Subscription {
            id: created.subscription_id.clone(),
            name: created.subscription_id,
            project_id,
            topic_id: created.topic_id,
        },
    }))
}
