//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! Handlers only read from [`Readiness`]; bootstrap writes to it through the
//! coordinator, so the router can be served before bootstrap finishes.
use crate::api;
use crate::cache::TopicCache;
use crate::hub::EventHub;
use crate::observability;
use crate::readiness::Readiness;
use axum::Router;
use axum::routing::{get, post};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub readiness: Arc<Readiness>,
    pub hub: EventHub,
    pub topics: Arc<TopicCache>,
    /// Directory of pre-built UI assets served for unmatched paths.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(readiness: Arc<Readiness>, hub: EventHub) -> Self {
        Self {
            readiness,
            hub,
            topics: Arc::new(TopicCache::new()),
            static_dir: None,
        }
    }

    pub fn with_static_dir(mut self, static_dir: Option<PathBuf>) -> Self {
        self.static_dir = static_dir;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });
    let static_dir = state.static_dir.clone();

    let router = Router::new()
        .route("/healthy", get(api::system::healthy))
        .route("/ready", get(api::system::ready))
        .route("/api/projects", get(api::projects::list_projects))
        .route(
            "/api/projects/:project_id/topics",
            post(api::topics::create_topic).get(api::topics::list_topics),
        )
        .route(
            "/api/projects/:project_id/topics/:topic_id",
            post(api::topics::publish).get(api::stream::subscribe),
        )
        .route(
            "/api/projects/:project_id/topics/:topic_id/subscriptions",
            post(api::subscriptions::create_subscription),
        )
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(trace_layer)
}
