#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use pubsubui::app::{AppState, build_router};
use pubsubui::catalog::{MessagePayload, PayloadMap, topic_key};
use pubsubui::clients::ClientMap;
use pubsubui::hub::EventHub;
use pubsubui::readiness::Readiness;
use pubsubui_broker::BrokerClient;
use pubsubui_broker::memory::MemoryBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub struct TestApp {
    pub broker: MemoryBroker,
    pub readiness: Arc<Readiness>,
    pub hub: EventHub,
    pub router: axum::Router,
}

/// App with nothing recorded yet, as right after startup.
pub fn pending_app() -> TestApp {
    let broker = MemoryBroker::with_timing(Duration::from_millis(20), Duration::from_secs(10));
    let readiness = Arc::new(Readiness::new());
    let (hub, _task) = EventHub::spawn(CancellationToken::new());
    let router = build_router(AppState::new(Arc::clone(&readiness), hub.clone()));
    TestApp {
        broker,
        readiness,
        hub,
        router,
    }
}

/// App with every stage recorded for `projects`, and canned payloads for
/// `p1/orders`.
pub fn ready_app(projects: &[&str]) -> TestApp {
    let app = pending_app();
    let clients: ClientMap = projects
        .iter()
        .map(|project| {
            let client: Arc<dyn BrokerClient> = Arc::new(app.broker.client(*project));
            (project.to_string(), client)
        })
        .collect();
    let mut payloads = PayloadMap::new();
    payloads.insert(
        topic_key("p1", "orders"),
        vec![MessagePayload {
            name: "new order".to_string(),
            payload: r#"{"id": 1}"#.to_string(),
        }],
    );
    app.readiness
        .record_projects(projects.iter().map(|p| p.to_string()).collect());
    app.readiness.record_clients(clients);
    app.readiness.record_catalog(payloads);
    app.readiness.record_provisioning_done();
    app
}
