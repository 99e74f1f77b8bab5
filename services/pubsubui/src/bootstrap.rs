// Bootstrap pipeline: publishes the catalog, resolves projects, builds the
// client pool and provisions topics, completing one readiness signal per
// stage. A failed stage returns early; the signals it never sent are dropped
// and the service stays not-ready.
use crate::catalog::Catalog;
use crate::clients::build_clients;
use crate::provision::{ProvisionSummary, ProvisionTimeouts, provision_all};
use crate::readiness::ReadinessSignals;
use anyhow::Context;
use pubsubui_broker::BrokerConnector;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    /// Projects named in configuration, in configured order.
    pub configured_projects: Vec<String>,
    pub catalog: Catalog,
    pub timeouts: ProvisionTimeouts,
}

/// Configured projects followed by catalog projects, without blanks or
/// duplicates.
pub fn resolve_projects(configured: &[String], catalog: &Catalog) -> Vec<String> {
    let mut seen = HashSet::new();
    configured
        .iter()
        .map(|project| project.trim().to_string())
        .chain(catalog.project_ids())
        .filter(|project| !project.is_empty())
        .filter(|project| seen.insert(project.clone()))
        .collect()
}

pub async fn run_bootstrap(
    plan: BootstrapPlan,
    connector: Arc<dyn BrokerConnector>,
    signals: ReadinessSignals,
) -> anyhow::Result<ProvisionSummary> {
    let ReadinessSignals {
        projects: projects_signal,
        clients: clients_signal,
        catalog: catalog_signal,
        provisioned: provisioned_signal,
    } = signals;

    let _ = catalog_signal.send(plan.catalog.payloads_by_topic_key());

    let projects = resolve_projects(&plan.configured_projects, &plan.catalog);
    if projects.is_empty() {
        tracing::warn!("no projects configured");
    }
    let _ = projects_signal.send(projects.clone());

    let clients = build_clients(connector.as_ref(), &projects)
        .await
        .context("building broker clients")?;
    let _ = clients_signal.send(clients.clone());

    let summary = provision_all(&clients, &plan.catalog, plan.timeouts)
        .await
        .context("provisioning topics and subscriptions")?;
    let _ = provisioned_signal.send(());
    Ok(summary)
}

pub fn spawn_bootstrap(
    plan: BootstrapPlan,
    connector: Arc<dyn BrokerConnector>,
    signals: ReadinessSignals,
) -> JoinHandle<anyhow::Result<ProvisionSummary>> {
    tokio::spawn(async move {
        let result = run_bootstrap(plan, connector, signals).await;
        if let Err(err) = &result {
            tracing::error!(error = %format!("{err:#}"), "bootstrap failed; service will not become ready");
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TopicSpec;
    use crate::clients::ClientPoolError;
    use crate::provision::ProvisionError;
    use crate::readiness::{Readiness, ReadinessStatus, Stage, spawn_coordinator};
    use crate::test_support::{FaultyClient, Faults, set};
    use async_trait::async_trait;
    use pubsubui_broker::memory::MemoryBroker;
    use pubsubui_broker::{BrokerClient, BrokerError, Code};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn topic(project: &str, name: &str, subscriptions: &[&str]) -> TopicSpec {
        TopicSpec {
            name: name.to_string(),
            project_id: project.to_string(),
            subscriptions: ids(subscriptions),
            payloads: Vec::new(),
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl BrokerConnector for RefusingConnector {
        async fn connect(&self, _project_id: &str) -> pubsubui_broker::Result<Arc<dyn BrokerClient>> {
            Err(BrokerError::new(Code::Unauthenticated, "no credentials"))
        }

        fn backend_name(&self) -> &'static str {
            "refusing"
        }
    }

    struct FaultyConnector {
        broker: MemoryBroker,
        fail_subscriptions: &'static [&'static str],
    }

    #[async_trait]
    impl BrokerConnector for FaultyConnector {
        async fn connect(&self, project_id: &str) -> pubsubui_broker::Result<Arc<dyn BrokerClient>> {
            Ok(FaultyClient::new(
                &self.broker,
                project_id,
                Faults {
                    fail_subscriptions: set(self.fail_subscriptions),
                    ..Default::default()
                },
            ))
        }

        fn backend_name(&self) -> &'static str {
            "faulty"
        }
    }

    #[test]
    fn resolve_projects_unions_and_dedupes() {
        let catalog = Catalog {
            topics: vec![topic("p2", "t", &[]), topic("p1", "t", &[])],
        };
        assert_eq!(
            resolve_projects(&ids(&["p1", "", " p3 "]), &catalog),
            ids(&["p1", "p3", "p2"])
        );
        assert!(resolve_projects(&[], &Catalog::default()).is_empty());
    }

    #[tokio::test]
    async fn empty_catalog_with_one_project_becomes_ready() {
        let readiness = Arc::new(Readiness::new());
        let (signals, coordinator) = spawn_coordinator(Arc::clone(&readiness));
        let plan = BootstrapPlan {
            configured_projects: ids(&["p1"]),
            ..Default::default()
        };
        let summary = spawn_bootstrap(plan, Arc::new(MemoryBroker::new()), signals)
            .await
            .expect("task")
            .expect("bootstrap");
        assert_eq!(summary.topics, 0);

        coordinator.await.expect("coordinator");
        assert_eq!(readiness.snapshot_status(), ReadinessStatus::Ready);
        assert!(readiness.is_servable("p1"));
    }

    #[tokio::test]
    async fn catalog_topics_are_provisioned_before_ready() {
        let broker = MemoryBroker::new();
        let readiness = Arc::new(Readiness::new());
        let (signals, coordinator) = spawn_coordinator(Arc::clone(&readiness));
        let plan = BootstrapPlan {
            configured_projects: Vec::new(),
            catalog: Catalog {
                topics: vec![topic("p1", "orders", &["audit"])],
            },
            timeouts: ProvisionTimeouts::default(),
        };
        run_bootstrap(plan, Arc::new(broker.clone()), signals)
            .await
            .expect("bootstrap");
        coordinator.await.expect("coordinator");

        assert!(readiness.snapshot_status().is_ready());
        assert_eq!(readiness.projects().expect("projects").as_slice(), ["p1"]);
        assert!(broker.has_subscription("p1", "audit"));
    }

    #[tokio::test]
    async fn client_failure_keeps_service_waiting() {
        let readiness = Arc::new(Readiness::new());
        let (signals, coordinator) = spawn_coordinator(Arc::clone(&readiness));
        let plan = BootstrapPlan {
            configured_projects: ids(&["p1"]),
            ..Default::default()
        };
        let err = run_bootstrap(plan, Arc::new(RefusingConnector), signals)
            .await
            .expect_err("clients fail");
        let pool = err.downcast_ref::<ClientPoolError>().expect("pool error");
        assert_eq!(pool.project_id, "p1");

        coordinator.await.expect("coordinator");
        assert_eq!(
            readiness.snapshot_status(),
            ReadinessStatus::Waiting(vec![Stage::Clients, Stage::Provisioning])
        );
        // Projects were published before the failure and stay visible.
        assert!(readiness.projects().is_some());
    }

    #[tokio::test]
    async fn provisioning_failure_keeps_service_waiting() {
        let readiness = Arc::new(Readiness::new());
        let (signals, coordinator) = spawn_coordinator(Arc::clone(&readiness));
        let plan = BootstrapPlan {
            configured_projects: Vec::new(),
            catalog: Catalog {
                topics: vec![topic("p1", "orders", &["s1"])],
            },
            timeouts: ProvisionTimeouts::default(),
        };
        let connector = FaultyConnector {
            broker: MemoryBroker::new(),
            fail_subscriptions: &["s1"],
        };
        let err = run_bootstrap(plan, Arc::new(connector), signals)
            .await
            .expect_err("subscription fails");
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Subscriptions { .. })
        ));
        assert!(format!("{err:#}").contains("\"s1\""));

        coordinator.await.expect("coordinator");
        assert_eq!(
            readiness.snapshot_status(),
            ReadinessStatus::Waiting(vec![Stage::Provisioning])
        );
    }
}
