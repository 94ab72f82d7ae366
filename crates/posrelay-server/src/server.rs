use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionHandle};
use crate::registry::Registry;

pub struct ServerState {
    pub registry: Arc<Registry>,
    pub connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    pub config: ServerConfig,
    slots: Arc<Semaphore>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> SharedState {
        Arc::new(Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
        })
    }

    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn open_connection(&self, id: Uuid, peer_addr: SocketAddr) -> usize {
        let mut conns = self.connections.write().await;
        conns.insert(
            id,
            ConnectionHandle {
                peer_addr,
                connected_at: Instant::now(),
            },
        );
        conns.len()
    }

    /// Called by each connection task as it exits.
    pub async fn close_connection(&self, id: Uuid) {
        let (removed, remaining) = {
            let mut conns = self.connections.write().await;
            let removed = conns.remove(&id);
            (removed, conns.len())
        };
        let logged_in = self.registry.logged_in_count();
        match removed {
            Some(handle) => tracing::info!(
                "Removed connection from {} after {:?}. {} remaining connections, {} players logged in.",
                handle.peer_addr,
                handle.connected_at.elapsed(),
                remaining,
                logged_in
            ),
            None => tracing::warn!("Connection {} was not in the active set", id),
        }
    }
}

pub async fn run(config: ServerConfig, registry: Arc<Registry>) -> anyhow::Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    serve(listener, ServerState::new(config, registry)).await
}

/// Accept loop. Only returns if the slot semaphore is closed.
pub async fn serve(listener: TcpListener, state: SharedState) -> anyhow::Result<()> {
    loop {
        // Taking a slot before accepting leaves excess clients queued in the backlog.
        let permit = state.slots.clone().acquire_owned().await?;

        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let id = Uuid::new_v4();
        let active = state.open_connection(id, peer_addr).await;
        tracing::info!(
            "New connection from {} ({}/{})",
            peer_addr,
            active,
            state.config.max_connections
        );

        let state = state.clone();
        tokio::spawn(async move {
            connection::handle_connection(id, stream, peer_addr, &state).await;
            state.close_connection(id).await;
            drop(permit);
        });
    }
}
