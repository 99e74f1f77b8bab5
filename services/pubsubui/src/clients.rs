// Client pool: one broker handle per target project.
use pubsubui_broker::{BrokerClient, BrokerConnector, BrokerError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type ClientMap = HashMap<String, Arc<dyn BrokerClient>>;

#[derive(Debug, Error)]
#[error("could not create broker client for project {project_id:?}: {source}")]
pub struct ClientPoolError {
    pub project_id: String,
    #[source]
    pub source: BrokerError,
}

/// Builds a client for each project, stopping at the first failure.
///
/// Clients built before a failure are dropped with the partial map.
pub async fn build_clients(
    connector: &dyn BrokerConnector,
    project_ids: &[String],
) -> Result<ClientMap, ClientPoolError> {
    let mut clients = ClientMap::with_capacity(project_ids.len());
    for project_id in project_ids {
        if clients.contains_key(project_id) {
            continue;
        }
        tracing::info!(project_id = %project_id, backend = connector.backend_name(), "creating broker client");
        let client = connector
            .connect(project_id)
            .await
            .map_err(|source| ClientPoolError {
                project_id: project_id.clone(),
                source,
            })?;
        clients.insert(project_id.clone(), client);
    }
    Ok(clients)
}
