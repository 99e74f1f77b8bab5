// Pubsubui service main entry point.
use anyhow::{Context, Result};
use clap::Parser;
use pubsubui::app::{AppState, build_router};
use pubsubui::bootstrap::{BootstrapPlan, spawn_bootstrap};
use pubsubui::catalog::Catalog;
use pubsubui::config::{CliArgs, PubsubuiConfig};
use pubsubui::hub::EventHub;
use pubsubui::observability;
use pubsubui::readiness::{Readiness, spawn_coordinator};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = PubsubuiConfig::resolve(&args)?;
    run_with_shutdown(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run_with_shutdown<F>(config: PubsubuiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("pubsubui")?;

    // A broken topics document is fatal before anything is served.
    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path).context("load topics config")?,
        None => Catalog::default(),
    };
    let connector = config.connector()?;
    tracing::info!(
        backend = connector.backend_name(),
        topics = catalog.topics.len(),
        "pubsubui starting"
    );

    let cancel = CancellationToken::new();
    let readiness = Arc::new(Readiness::new());
    let (hub, hub_task) = EventHub::spawn(cancel.child_token());
    let (signals, coordinator) = spawn_coordinator(Arc::clone(&readiness));
    let bootstrap = spawn_bootstrap(
        BootstrapPlan {
            configured_projects: config.projects.clone(),
            catalog,
            timeouts: config.provision_timeouts(),
        },
        connector,
        signals,
    );

    let metrics_task = {
        let cancel = cancel.clone();
        tokio::spawn(observability::serve_metrics_with_shutdown(
            metrics_handle,
            config.metrics_bind,
            async move { cancel.cancelled().await },
        ))
    };

    let state = AppState::new(Arc::clone(&readiness), hub.clone())
        .with_static_dir(config.static_dir.clone());
    let app = build_router(state);
    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            // Nothing was served; stop the background tasks before bailing out.
            hub.shutdown().await;
            cancel.cancel();
            bootstrap.abort();
            coordinator.abort();
            let _ = hub_task.await;
            let _ = metrics_task.await;
            return Err(err).with_context(|| format!("bind {}", config.bind_addr));
        }
    };
    tracing::info!(addr = %listener.local_addr()?, "pubsubui listening");

    let mut server = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        })
    };

    tokio::pin!(shutdown);
    let server_exited = tokio::select! {
        _ = &mut shutdown => None,
        result = &mut server => Some(result),
    };

    // Close live streams first so their response bodies end and the server
    // can drain.
    let signalled = hub.shutdown().await;
    tracing::info!(streams = signalled, "shutting down");
    cancel.cancel();

    let served = match server_exited {
        Some(result) => result,
        None => match tokio::time::timeout(config.shutdown_grace, &mut server).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(grace = ?config.shutdown_grace, "connections still open after grace period");
                server.abort();
                Ok(Ok(()))
            }
        },
    };

    let _ = hub_task.await;
    if let Ok(Err(err)) = metrics_task.await {
        tracing::warn!(error = %err, "metrics server exited with error");
    }

    let bootstrap_result = if bootstrap.is_finished() {
        Some(bootstrap.await)
    } else {
        bootstrap.abort();
        None
    };
    coordinator.abort();
    tracing::info!("pubsubui stopped");

    served.context("server task")?.context("serve http")?;
    match bootstrap_result {
        Some(Ok(Err(err))) => Err(err),
        Some(Err(err)) if !err.is_cancelled() => Err(err).context("bootstrap task"),
        _ => Ok(()),
    }
}
