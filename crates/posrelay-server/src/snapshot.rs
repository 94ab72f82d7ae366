//! JSON roster snapshots. Login state is never written.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use posrelay_common::player::PlayerRecord;
use posrelay_common::protocol::MAX_NAME_LEN;

use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot i/o on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed roster {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("roster {} has a {len}-byte name, limit is {max}", .path.display(), max = MAX_NAME_LEN)]
    NameTooLong { path: PathBuf, len: usize },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Roster {
    pub saved_at: DateTime<Utc>,
    pub players: Vec<PlayerRecord>,
}

/// Writes every record to `path` via a temporary sibling. Returns the count written.
pub async fn save(registry: &Registry, path: &Path) -> Result<usize, SnapshotError> {
    let mut players = registry.list_all();
    players.sort_by(|a, b| a.name.cmp(&b.name));
    let count = players.len();

    let roster = Roster {
        saved_at: Utc::now(),
        players,
    };
    let json = serde_json::to_vec_pretty(&roster).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(count)
}

pub async fn load(path: &Path) -> Result<Vec<PlayerRecord>, SnapshotError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let roster: Roster = serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(long) = roster.players.iter().find(|p| p.name.len() > MAX_NAME_LEN) {
        return Err(SnapshotError::NameTooLong {
            path: path.to_path_buf(),
            len: long.name.len(),
        });
    }
    Ok(roster.players)
}

pub fn spawn_periodic(registry: Arc<Registry>, path: PathBuf, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match save(&registry, &path).await {
                Ok(count) => tracing::debug!("Snapshot of {} players written to {}", count, path.display()),
                Err(e) => tracing::error!("Snapshot failed: {}", e),
            }
        }
    })
}
