// Event hub: registry of live streaming clients.
//
// A single task owns the membership map and applies join/leave/shutdown
// commands in arrival order. The command channel is unbounded so registering
// or leaving never waits on the actor, and the actor never waits on a client:
// each member is a one-shot close signal, fired exactly once on shutdown.
//
// Post-shutdown joins are rejected with `HubError::Closed`. Any join still
// queued when shutdown runs is rejected the same way.
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("event hub is shut down")]
    Closed,
}

enum HubCommand {
    Join {
        close: oneshot::Sender<()>,
        response: oneshot::Sender<u64>,
    },
    Leave {
        id: u64,
    },
    Members {
        response: oneshot::Sender<usize>,
    },
    Shutdown {
        response: oneshot::Sender<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct EventHub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl EventHub {
    /// Starts the hub task. Cancelling `shutdown` has the same effect as
    /// calling [`EventHub::shutdown`].
    pub fn spawn(shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_hub(rx, shutdown));
        (Self { commands: tx }, handle)
    }

    pub async fn join(&self) -> Result<ClientHandle, HubError> {
        let (close_tx, close_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Join {
                close: close_tx,
                response: response_tx,
            })
            .map_err(|_| HubError::Closed)?;
        let id = response_rx.await.map_err(|_| HubError::Closed)?;
        Ok(ClientHandle {
            id,
            closed: close_rx,
            fired: false,
            commands: self.commands.clone(),
        })
    }

    /// Deregisters a client. Equivalent to dropping the handle.
    pub fn leave(&self, handle: ClientHandle) {
        drop(handle);
    }

    /// Current member count; zero once the hub has shut down.
    pub async fn member_count(&self) -> usize {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Members {
                response: response_tx,
            })
            .is_err()
        {
            return 0;
        }
        response_rx.await.unwrap_or(0)
    }

    /// Signals every registered client, clears the registry and stops the
    /// hub. Returns how many clients were signalled.
    pub async fn shutdown(&self) -> usize {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Shutdown {
                response: response_tx,
            })
            .is_err()
        {
            return 0;
        }
        response_rx.await.unwrap_or(0)
    }
}

/// Membership handle for one streaming client. Dropping it leaves the hub.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    closed: oneshot::Receiver<()>,
    fired: bool,
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves once the hub has closed this client's channel.
    pub async fn closed(&mut self) {
        if self.fired {
            return;
        }
        let _ = (&mut self.closed).await;
        self.fired = true;
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(HubCommand::Leave { id: self.id });
    }
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCommand::Join { .. } => f.write_str("Join"),
            HubCommand::Leave { id } => write!(f, "Leave({id})"),
            HubCommand::Members { .. } => f.write_str("Members"),
            HubCommand::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

async fn run_hub(mut rx: mpsc::UnboundedReceiver<HubCommand>, shutdown: CancellationToken) {
    let mut members: HashMap<u64, oneshot::Sender<()>> = HashMap::new();
    let mut next_id: u64 = 1;

    let reply = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            command = rx.recv() => match command {
                Some(HubCommand::Join { close, response }) => {
                    let id = next_id;
                    next_id += 1;
                    // The joiner may have given up while the command was queued.
                    if response.send(id).is_ok() {
                        members.insert(id, close);
                        metrics::gauge!("pubsubui_hub_members").set(members.len() as f64);
                        tracing::debug!(client_id = id, members = members.len(), "client joined");
                    }
                }
                Some(HubCommand::Leave { id }) => {
                    if members.remove(&id).is_some() {
                        metrics::gauge!("pubsubui_hub_members").set(members.len() as f64);
                        tracing::debug!(client_id = id, members = members.len(), "client left");
                    }
                }
                Some(HubCommand::Members { response }) => {
                    let _ = response.send(members.len());
                }
                Some(HubCommand::Shutdown { response }) => break Some(response),
                // Every sender is gone, including all client handles.
                None => break None,
            },
        }
    };

    // Snapshot membership before signalling anyone.
    let snapshot: Vec<(u64, oneshot::Sender<()>)> = members.drain().collect();
    let signalled = snapshot.len();
    for (_, close) in snapshot {
        let _ = close.send(());
    }
    metrics::gauge!("pubsubui_hub_members").set(0.0);
    tracing::info!(clients = signalled, "event hub shut down");

    rx.close();
    while let Ok(command) = rx.try_recv() {
        match command {
            // Dropping the response rejects the join.
            HubCommand::Join { .. } | HubCommand::Leave { .. } => {}
            HubCommand::Members { response } => {
                let _ = response.send(0);
            }
            HubCommand::Shutdown { response } => {
                let _ = response.send(0);
            }
        }
    }
    if let Some(response) = reply {
        let _ = response.send(signalled);
    }
}
