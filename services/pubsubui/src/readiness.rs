//! Readiness coordination for the bootstrap pipeline.
//!
//! # Purpose
//! Tracks the four bootstrap stages (project resolution, client construction,
//! catalog loading, provisioning) and exposes the data each stage publishes
//! to request handlers.
//!
//! # Key invariants
//! - Each stage latches `unset -> set` once; a later record is ignored.
//! - Every read that combines stages happens under the one lock, so callers
//!   never observe a torn combination.
//! - Readiness is monotonic: once `Ready`, always `Ready`.
//!
//! # Notes
//! Producers never touch [`Readiness`] directly. They complete the one-shot
//! senders in [`ReadinessSignals`]; [`spawn_coordinator`] applies them in
//! whatever order they arrive. A sender dropped without sending marks a
//! failed stage, which leaves the service `Waiting` for good.
use crate::catalog::{MessagePayload, PayloadMap};
use crate::clients::ClientMap;
use parking_lot::Mutex;
use pubsubui_broker::BrokerClient;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Projects,
    Clients,
    Catalog,
    Provisioning,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Projects,
        Stage::Clients,
        Stage::Catalog,
        Stage::Provisioning,
    ];

    pub fn reason(&self) -> &'static str {
        match self {
            Stage::Projects => "GCP projects configuration",
            Stage::Clients => "Pub/Sub client initialization",
            Stage::Catalog => "topic configuration",
            Stage::Provisioning => "topic creation",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Stage::Projects => "projects",
            Stage::Clients => "clients",
            Stage::Catalog => "catalog",
            Stage::Provisioning => "provisioning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    Ready,
    /// Outstanding stages in fixed order: projects, clients, catalog,
    /// provisioning.
    Waiting(Vec<Stage>),
}

impl ReadinessStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessStatus::Ready)
    }
}

impl fmt::Display for ReadinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessStatus::Ready => f.write_str("Ready"),
            ReadinessStatus::Waiting(stages) => {
                let reasons: Vec<&str> = stages.iter().map(Stage::reason).collect();
                write!(f, "Waiting for {}", reasons.join(", "))
            }
        }
    }
}

/// Why a project cannot be served yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotServable {
    /// The client pool has not been published.
    Pending,
    /// The pool is published but holds no client for the project.
    UnknownProject,
}

#[derive(Default)]
struct State {
    projects: Option<Arc<Vec<String>>>,
    clients: Option<Arc<ClientMap>>,
    payloads: Option<Arc<PayloadMap>>,
    provisioned: bool,
}

impl State {
    fn missing(&self) -> Vec<Stage> {
        let done = [
            self.projects.is_some(),
            self.clients.is_some(),
            self.payloads.is_some(),
            self.provisioned,
        ];
        Stage::ALL
            .into_iter()
            .zip(done)
            .filter(|(_, done)| !done)
            .map(|(stage, _)| stage)
            .collect()
    }
}

#[derive(Default)]
pub struct Readiness {
    state: Mutex<State>,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("status", &self.snapshot_status())
            .finish()
    }
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_projects(&self, projects: Vec<String>) {
        let mut state = self.state.lock();
        if state.projects.is_some() {
            tracing::warn!("projects already recorded, ignoring");
            return;
        }
        tracing::info!(projects = ?projects, "projects resolved");
        state.projects = Some(Arc::new(projects));
        Self::after_record(&state);
    }

    pub fn record_clients(&self, clients: ClientMap) {
        let mut state = self.state.lock();
        if state.clients.is_some() {
            tracing::warn!("clients already recorded, ignoring");
            return;
        }
        tracing::info!(clients = clients.len(), "broker clients ready");
        state.clients = Some(Arc::new(clients));
        Self::after_record(&state);
    }

    pub fn record_catalog(&self, payloads: PayloadMap) {
        let mut state = self.state.lock();
        if state.payloads.is_some() {
            tracing::warn!("catalog already recorded, ignoring");
            return;
        }
        tracing::info!(topics = payloads.len(), "topic configuration loaded");
        state.payloads = Some(Arc::new(payloads));
        Self::after_record(&state);
    }

    pub fn record_provisioning_done(&self) {
        let mut state = self.state.lock();
        if state.provisioned {
            tracing::warn!("provisioning already recorded, ignoring");
            return;
        }
        tracing::info!("topic provisioning complete");
        state.provisioned = true;
        Self::after_record(&state);
    }

    fn after_record(state: &State) {
        let missing = state.missing();
        metrics::gauge!("pubsubui_bootstrap_stages_pending").set(missing.len() as f64);
        if missing.is_empty() {
            metrics::gauge!("pubsubui_ready").set(1.0);
            tracing::info!("service ready");
        }
    }

    pub fn snapshot_status(&self) -> ReadinessStatus {
        let missing = self.state.lock().missing();
        if missing.is_empty() {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::Waiting(missing)
        }
    }

    /// Resolved project list, once published.
    pub fn projects(&self) -> Option<Arc<Vec<String>>> {
        self.state.lock().projects.clone()
    }

    pub fn is_servable(&self, project_id: &str) -> bool {
        self.client(project_id).is_ok()
    }

    pub fn client(&self, project_id: &str) -> Result<Arc<dyn BrokerClient>, NotServable> {
        let state = self.state.lock();
        let clients = state.clients.as_ref().ok_or(NotServable::Pending)?;
        clients
            .get(project_id)
            .cloned()
            .ok_or(NotServable::UnknownProject)
    }

    /// Catalog payloads for a `project/topic` key. Empty until the catalog
    /// is published or when the topic has none.
    pub fn payloads_for(&self, key: &str) -> Vec<MessagePayload> {
        self.state
            .lock()
            .payloads
            .as_ref()
            .and_then(|payloads| payloads.get(key).cloned())
            .unwrap_or_default()
    }
}

/// One-shot completion signals, one per bootstrap stage.
pub struct ReadinessSignals {
    pub projects: oneshot::Sender<Vec<String>>,
    pub clients: oneshot::Sender<ClientMap>,
    pub catalog: oneshot::Sender<PayloadMap>,
    pub provisioned: oneshot::Sender<()>,
}

/// Spawns the task that applies stage signals to `readiness`.
///
/// The task finishes once every signal has either arrived or been dropped.
pub fn spawn_coordinator(readiness: Arc<Readiness>) -> (ReadinessSignals, JoinHandle<()>) {
    let (projects_tx, mut projects_rx) = oneshot::channel();
    let (clients_tx, mut clients_rx) = oneshot::channel();
    let (catalog_tx, mut catalog_rx) = oneshot::channel();
    let (provisioned_tx, mut provisioned_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let (mut projects_done, mut clients_done, mut catalog_done, mut provisioned_done) =
            (false, false, false, false);
        while !(projects_done && clients_done && catalog_done && provisioned_done) {
            tokio::select! {
                received = &mut projects_rx, if !projects_done => {
                    projects_done = true;
                    match received {
                        Ok(projects) => readiness.record_projects(projects),
                        Err(_) => abandoned(Stage::Projects),
                    }
                }
                received = &mut clients_rx, if !clients_done => {
                    clients_done = true;
                    match received {
                        Ok(clients) => readiness.record_clients(clients),
                        Err(_) => abandoned(Stage::Clients),
                    }
                }
                received = &mut catalog_rx, if !catalog_done => {
                    catalog_done = true;
                    match received {
                        Ok(payloads) => readiness.record_catalog(payloads),
                        Err(_) => abandoned(Stage::Catalog),
                    }
                }
                received = &mut provisioned_rx, if !provisioned_done => {
                    provisioned_done = true;
                    match received {
                        Ok(()) => readiness.record_provisioning_done(),
                        Err(_) => abandoned(Stage::Provisioning),
                    }
                }
            }
        }
        tracing::debug!(status = %readiness.snapshot_status(), "readiness coordinator finished");
    });

    (
        ReadinessSignals {
            projects: projects_tx,
            clients: clients_tx,
            catalog: catalog_tx,
            provisioned: provisioned_tx,
        },
        handle,
    )
}

fn abandoned(stage: Stage) {
    tracing::warn!(stage = stage.label(), "bootstrap stage abandoned; service will not become ready");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::topic_key;
    use pubsubui_broker::memory::MemoryBroker;
    use std::collections::HashMap;

    fn clients(broker: &MemoryBroker, projects: &[&str]) -> ClientMap {
        projects
            .iter()
            .map(|project| {
                let client: Arc<dyn BrokerClient> = Arc::new(broker.client(*project));
                (project.to_string(), client)
            })
            .collect()
    }

    fn payloads() -> PayloadMap {
        HashMap::from([(
            topic_key("p1", "orders"),
            vec![MessagePayload {
                name: "created".to_string(),
                payload: "{}".to_string(),
            }],
        )])
    }

    fn permutations(items: Vec<usize>) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.clone();
            let head = rest.remove(i);
            for mut tail in permutations(rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn fresh_state_waits_for_everything_in_order() {
        let readiness = Readiness::new();
        let status = readiness.snapshot_status();
        assert_eq!(status, ReadinessStatus::Waiting(Stage::ALL.to_vec()));
        assert_eq!(
            status.to_string(),
            "Waiting for GCP projects configuration, Pub/Sub client initialization, \
             topic configuration, topic creation"
        );
    }

    #[test]
    fn status_is_monotonic_and_only_ready_when_complete() {
        let broker = MemoryBroker::new();
        let readiness = Readiness::new();

        readiness.record_provisioning_done();
        assert_eq!(
            readiness.snapshot_status(),
            ReadinessStatus::Waiting(vec![Stage::Projects, Stage::Clients, Stage::Catalog])
        );
        readiness.record_catalog(payloads());
        readiness.record_projects(vec!["p1".to_string()]);
        assert_eq!(
            readiness.snapshot_status().to_string(),
            "Waiting for Pub/Sub client initialization"
        );
        readiness.record_clients(clients(&broker, &["p1"]));
        assert_eq!(readiness.snapshot_status(), ReadinessStatus::Ready);
        assert_eq!(readiness.snapshot_status().to_string(), "Ready");

        // Repeated records are ignored and never regress the status.
        readiness.record_projects(vec!["other".to_string()]);
        readiness.record_clients(ClientMap::new());
        assert!(readiness.snapshot_status().is_ready());
        assert_eq!(readiness.projects().expect("projects").as_slice(), ["p1"]);
        assert!(readiness.is_servable("p1"));
    }

    #[test]
    fn partial_state_is_exposed_as_soon_as_its_stage_is_set() {
        let broker = MemoryBroker::new();
        let readiness = Readiness::new();
        assert!(readiness.projects().is_none());
        assert_eq!(readiness.client("p1").err(), Some(NotServable::Pending));
        assert!(readiness.payloads_for("p1/orders").is_empty());

        readiness.record_projects(vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(readiness.projects().expect("projects").len(), 2);
        assert!(!readiness.is_servable("p1"));

        readiness.record_clients(clients(&broker, &["p1"]));
        assert!(readiness.is_servable("p1"));
        assert_eq!(readiness.client("p2").err(), Some(NotServable::UnknownProject));

        readiness.record_catalog(payloads());
        assert_eq!(readiness.payloads_for("p1/orders").len(), 1);
        assert!(readiness.payloads_for("p1/unknown").is_empty());
        assert!(!readiness.snapshot_status().is_ready());
    }

    #[tokio::test]
    async fn every_signal_order_reaches_the_same_ready_state() {
        let broker = MemoryBroker::new();
        let orders = permutations(vec![0, 1, 2, 3]);
        assert_eq!(orders.len(), 24);

        for order in orders {
            let readiness = Arc::new(Readiness::new());
            let (signals, handle) = spawn_coordinator(Arc::clone(&readiness));
            let ReadinessSignals {
                projects,
                clients: clients_tx,
                catalog,
                provisioned,
            } = signals;
            let mut projects = Some(projects);
            let mut clients_tx = Some(clients_tx);
            let mut catalog = Some(catalog);
            let mut provisioned = Some(provisioned);

            for stage in &order {
                match stage {
                    0 => {
                        let _ = projects.take().expect("once").send(vec!["p1".to_string()]);
                    }
                    1 => {
                        let _ = clients_tx
                            .take()
                            .expect("once")
                            .send(clients(&broker, &["p1"]));
                    }
                    2 => {
                        let _ = catalog.take().expect("once").send(payloads());
                    }
                    _ => {
                        let _ = provisioned.take().expect("once").send(());
                    }
                }
                tokio::task::yield_now().await;
            }

            handle.await.expect("coordinator");
            assert_eq!(readiness.snapshot_status(), ReadinessStatus::Ready, "order {order:?}");
            assert_eq!(readiness.projects().expect("projects").as_slice(), ["p1"]);
            assert!(readiness.is_servable("p1"));
            assert_eq!(readiness.payloads_for("p1/orders")[0].name, "created");
        }
    }

    #[tokio::test]
    async fn dropped_signal_leaves_service_waiting() {
        let readiness = Arc::new(Readiness::new());
        let (signals, handle) = spawn_coordinator(Arc::clone(&readiness));
        signals.projects.send(vec!["p1".to_string()]).expect("send");
        signals.catalog.send(PayloadMap::new()).expect("send");
        signals
            .clients
            .send(clients(&MemoryBroker::new(), &["p1"]))
            .map_err(|_| ())
            .expect("send");
        drop(signals.provisioned);

        handle.await.expect("coordinator");
        assert_eq!(
            readiness.snapshot_status(),
            ReadinessStatus::Waiting(vec![Stage::Provisioning])
        );
        assert_eq!(
            readiness.snapshot_status().to_string(),
            "Waiting for topic creation"
        );
    }
}
