use dashmap::DashMap;

use posrelay_common::player::{PlayerRecord, Position, Velocity};

/// Result of reverting a player's login flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    LoggedOut,
    AlreadyLoggedOut,
    /// The record changed between read and swap.
    Conflict,
    Missing,
}

/// Name-keyed player store. Contested fields are only ever changed through
/// compare-and-swap against a previously read record; each swap holds the
/// lock of one shard, never the whole map.
#[derive(Debug, Default)]
pub struct Registry {
    players: DashMap<String, PlayerRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
        }
    }

    pub fn with_players(records: impl IntoIterator<Item = PlayerRecord>) -> Self {
        let registry = Self::new();
        registry.seed(records);
        registry
    }

    /// Inserts records, replacing any with the same name.
    pub fn seed(&self, records: impl IntoIterator<Item = PlayerRecord>) {
        for record in records {
            self.players.insert(record.name.clone(), record);
        }
    }

    pub fn reset(&self) {
        self.players.clear();
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<PlayerRecord> {
        self.players.get(name).map(|entry| entry.value().clone())
    }

    pub fn list_all(&self) -> Vec<PlayerRecord> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Everyone except `name`. No spatial filtering.
    pub fn list_others(&self, name: &str) -> Vec<PlayerRecord> {
        self.players
            .iter()
            .filter(|entry| entry.key() != name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn logged_in_count(&self) -> usize {
        self.players.iter().filter(|entry| entry.logged_in).count()
    }

    /// Replaces the stored record with `next` only if it still equals `expected`.
    pub fn try_update(&self, name: &str, expected: &PlayerRecord, next: PlayerRecord) -> bool {
        debug_assert_eq!(next.name, name);
        match self.players.get_mut(name) {
            Some(mut slot) if *slot == *expected => {
                *slot = next;
                true
            }
            _ => false,
        }
    }

    /// `false` means unknown, already logged in, or a stale read. Callers do not retry.
    pub fn try_login(&self, name: &str) -> bool {
        let Some(current) = self.find(name) else {
            return false;
        };
        if current.logged_in {
            return false;
        }
        let next = current.with_logged_in(true);
        self.try_update(name, &current, next)
    }

    pub fn try_logout(&self, name: &str) -> LogoutOutcome {
        let Some(current) = self.find(name) else {
            return LogoutOutcome::Missing;
        };
        if !current.logged_in {
            return LogoutOutcome::AlreadyLoggedOut;
        }
        let next = current.with_logged_in(false);
        if self.try_update(name, &current, next) {
            LogoutOutcome::LoggedOut
        } else {
            LogoutOutcome::Conflict
        }
    }

    /// Last writer wins. Only the session bound to `name` writes its position.
    pub fn update_position(&self, name: &str, position: Position) -> bool {
        match self.players.get_mut(name) {
            Some(mut slot) => {
                let next = slot.with_position(position);
                *slot = next;
                true
            }
            None => false,
        }
    }
}

/// Built-in roster used when no roster file is configured.
pub fn default_roster() -> Vec<PlayerRecord> {
    [
        ("James", "jamespass", Position::new(200.0, 200.0)),
        ("Gleb", "glebpass", Position::new(400.0, 300.0)),
    ]
    .into_iter()
    .filter_map(|(name, password, position)| {
        PlayerRecord::new(name, password, position, Velocity::default()).ok()
    })
    .collect()
}
