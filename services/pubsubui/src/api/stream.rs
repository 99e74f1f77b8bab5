//! Live topic stream over server-sent events.
//!
//! # Notes
//! Each request gets its own temporary subscription and delivery task; the
//! response body is the receiving half of that task's channel. Until the task
//! is spawned the subscription is held by a [`TempSubscription`], so a request
//! dropped mid-setup still deletes it.
use crate::api::client_for;
use crate::api::error::{ApiError, api_bad_request, api_broker, api_unavailable};
use crate::app::AppState;
use crate::stream::{STREAM_BUFFER, StreamSession, TempSubscription, run_delivery};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response, Sse};
use axum::response::sse::KeepAlive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub(crate) async fn subscribe(
    State(state): State<AppState>,
    Path((project_id, topic_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let client = client_for(&state, &project_id)?;
    let exists = client
        .topic_exists(&topic_id)
        .await
        .map_err(|err| api_broker("check topic", &err))?;
    if !exists {
        return Err(api_bad_request(&format!("topic {topic_id:?} does not exist")));
    }

    let subscription = TempSubscription::create(Arc::clone(&client), &topic_id)
        .await
        .map_err(|err| api_broker("create stream subscription", &err))?;

    let handle = match state.hub.join().await {
        Ok(handle) => handle,
        Err(err) => {
            subscription.delete().await;
            return Err(api_unavailable(&format!("cannot open stream: {err}")));
        }
    };

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    // No await between the hand-over and the spawn.
    let subscription = subscription.into_name();
    tokio::spawn(run_delivery(
        StreamSession {
            client,
            topic: topic_id,
            subscription,
            handle,
        },
        tx,
    ));

    let sse = Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL));
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        sse,
    )
        .into_response())
}
