use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Roster to seed from. `None` uses the built-in roster.
    pub roster: Option<PathBuf>,
    pub snapshot_path: PathBuf,
    /// `None` disables periodic snapshots; the startup snapshot is still written.
    pub snapshot_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 11000,
            max_connections: 8,
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            roster: None,
            snapshot_path: PathBuf::from("players.json"),
            snapshot_interval: Some(Duration::from_secs(60)),
        }
    }
}
