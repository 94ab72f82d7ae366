use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{MAX_NAME_LEN, PASSWORD_SLOT_LEN};

const PASSWORD_PAD: u8 = b' ';

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Informational only; the relay never integrates it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("player name is {0} bytes, limit is {max}", max = MAX_NAME_LEN)]
    NameTooLong(usize),
    #[error("password is {0} bytes, limit is {max}", max = PASSWORD_SLOT_LEN)]
    PasswordTooLong(usize),
}

/// A password as it travels on the wire: exactly 128 bytes, right-padded
/// with spaces. Stored and compared in the clear.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PasswordSlot([u8; PASSWORD_SLOT_LEN]);

impl PasswordSlot {
    pub fn new(password: &str) -> Result<Self, PlayerError> {
        let bytes = password.as_bytes();
        if bytes.len() > PASSWORD_SLOT_LEN {
            return Err(PlayerError::PasswordTooLong(bytes.len()));
        }
        let mut slot = [PASSWORD_PAD; PASSWORD_SLOT_LEN];
        slot[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(slot))
    }

    /// Wraps bytes read off the wire verbatim. No padding is applied.
    pub fn from_wire(bytes: [u8; PASSWORD_SLOT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PASSWORD_SLOT_LEN] {
        &self.0
    }

    /// The password with its padding stripped.
    pub fn trimmed(&self) -> String {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != PASSWORD_PAD)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for PasswordSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordSlot(..)")
    }
}

impl TryFrom<String> for PasswordSlot {
    type Error = PlayerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PasswordSlot> for String {
    fn from(slot: PasswordSlot) -> Self {
        slot.trimmed()
    }
}

/// One version of a player's state. Records are replaced wholesale on every
/// change, and compare-and-swap in the registry matches on full-value
/// equality against the version that was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub password: PasswordSlot,
    pub position: Position,
    pub velocity: Velocity,
    #[serde(skip)]
    pub logged_in: bool,
}

impl PlayerRecord {
    pub fn new(
        name: impl Into<String>,
        password: &str,
        position: Position,
        velocity: Velocity,
    ) -> Result<Self, PlayerError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(PlayerError::NameTooLong(name.len()));
        }
        Ok(Self {
            name,
            password: PasswordSlot::new(password)?,
            position,
            velocity,
            logged_in: false,
        })
    }

    pub fn with_logged_in(&self, logged_in: bool) -> Self {
        Self {
            logged_in,
            ..self.clone()
        }
    }

    pub fn with_position(&self, position: Position) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }
}
