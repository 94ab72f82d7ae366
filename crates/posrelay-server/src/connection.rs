use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::Instrument;
use uuid::Uuid;

use posrelay_common::codec::WireStream;

use crate::server::SharedState;
use crate::session::Session;

pub struct ConnectionHandle {
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
}

/// Runs one accepted socket to completion. Never fails: faults are logged here, once.
pub async fn handle_connection(id: Uuid, stream: TcpStream, peer_addr: SocketAddr, state: &SharedState) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let wire = WireStream::new(stream, state.config.read_timeout, state.config.write_timeout);
    let session = Session::new(wire, state.registry.clone());

    let span = tracing::info_span!("session", %id, peer = %peer_addr);
    if let Err(fault) = session.run().instrument(span).await {
        tracing::error!("Session {} from {} hit an internal fault: {}", id, peer_addr, fault);
    }
}
