//! Per-connection protocol state machine.
//!
//! ```text
//! Authenticating -> LoggingIn -> Exchanging -> Exchanging -> ...
//! ```
//!
//! Every step receives before it sends. Any error ends the session; the
//! login flag is reverted only if this session set it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use posrelay_common::codec::{WireError, WireStream};
use posrelay_common::player::{PasswordSlot, Position};
use posrelay_common::protocol::{
    self, CLIENT_HANDSHAKE, LOGIN_SUCCESS, MAX_NAME_LEN, PASSWORD_SLOT_LEN, SERVER_HANDSHAKE,
};

use crate::registry::{LogoutOutcome, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Authenticating,
    LoggingIn,
    Exchanging { player: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("player '{0}' not found")]
    UnknownPlayer(String),
    #[error("player '{0}' already logged in")]
    AlreadyLoggedIn(String),
    #[error("wrong password for '{0}'")]
    WrongPassword(String),
    #[error("login for '{0}' raced with another update")]
    LoginConflict(String),
}

/// Why a session ended. None of these reach the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthFailure),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Timeout(after) => SessionError::Timeout(after),
            WireError::ConnectionClosed => SessionError::ConnectionClosed,
            WireError::InvalidUtf8(e) => SessionError::ProtocolViolation(format!("invalid UTF-8: {e}")),
            WireError::NegativeLength(n) => SessionError::ProtocolViolation(format!("negative length {n}")),
            WireError::Io(e) => SessionError::Io(e),
        }
    }
}

/// An internal invariant broke. Ends this session only.
#[derive(Debug, thiserror::Error)]
pub enum SessionFault {
    #[error("record for logged-in player '{0}' vanished from the registry")]
    RecordVanished(String),
}

pub struct Session<S> {
    wire: WireStream<S>,
    registry: Arc<Registry>,
    phase: Phase,
    /// Set only when this session's own login swap succeeded.
    bound: Option<String>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(wire: WireStream<S>, registry: Arc<Registry>) -> Self {
        Self {
            wire,
            registry,
            phase: Phase::Authenticating,
            bound: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn bound_name(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    /// Drives the session until the peer fails, then releases the login.
    pub async fn run(mut self) -> Result<(), SessionFault> {
        let reason = loop {
            if let Err(e) = self.step().await {
                break e;
            }
        };
        self.log_end(&reason);

        let released = self.release();
        if let Err(e) = self.wire.shutdown().await {
            tracing::debug!("shutdown after session end failed: {}", e);
        }
        released
    }

    /// One receive/send pair. Returns the phase entered.
    pub async fn step(&mut self) -> Result<&Phase, SessionError> {
        let next = match self.phase.clone() {
            Phase::Authenticating => {
                self.receive_handshake().await?;
                self.wire.send_i32(SERVER_HANDSHAKE).await?;
                Phase::LoggingIn
            }
            Phase::LoggingIn => {
                let attempt = self.receive_login().await?;
                let player = self.send_login_result(attempt).await?;
                Phase::Exchanging { player }
            }
            Phase::Exchanging { player } => {
                self.receive_position(&player).await?;
                self.send_others(&player).await?;
                Phase::Exchanging { player }
            }
        };
        self.phase = next;
        Ok(&self.phase)
    }

    async fn receive_handshake(&mut self) -> Result<(), SessionError> {
        let value = self.wire.read_i32().await?;
        if value != CLIENT_HANDSHAKE {
            return Err(SessionError::ProtocolViolation(format!(
                "bad handshake value {value}"
            )));
        }
        tracing::debug!("handshake accepted");
        Ok(())
    }

    /// Protocol faults are errors; credential problems are returned as the
    /// attempt's outcome and surface in the send step.
    async fn receive_login(&mut self) -> Result<Result<String, AuthFailure>, SessionError> {
        let len = self.wire.read_i32().await?;
        if !(0..=MAX_NAME_LEN as i32).contains(&len) {
            return Err(SessionError::ProtocolViolation(format!(
                "name length {len} outside 0..={MAX_NAME_LEN}"
            )));
        }
        let name = self.wire.read_string(len as usize).await?;
        tracing::debug!(player = %name, "login attempt");

        let Some(record) = self.registry.find(&name) else {
            return Ok(Err(AuthFailure::UnknownPlayer(name)));
        };
        if record.logged_in {
            return Ok(Err(AuthFailure::AlreadyLoggedIn(name)));
        }

        let password = PasswordSlot::from_wire(self.wire.read_array::<PASSWORD_SLOT_LEN>().await?);
        if password != record.password {
            return Ok(Err(AuthFailure::WrongPassword(name)));
        }

        if !self.registry.try_login(&name) {
            return Ok(Err(AuthFailure::LoginConflict(name)));
        }
        self.bound = Some(name.clone());
        Ok(Ok(name))
    }

    async fn send_login_result(
        &mut self,
        attempt: Result<String, AuthFailure>,
    ) -> Result<String, SessionError> {
        let player = attempt?;
        self.wire.send_i32(LOGIN_SUCCESS).await?;
        tracing::info!(player = %player, "logged in");
        Ok(player)
    }

    async fn receive_position(&mut self, player: &str) -> Result<(), SessionError> {
        let position = self.wire.read_position().await?;
        if !position.is_finite() {
            return Err(SessionError::ProtocolViolation(format!(
                "non-finite position ({}, {})",
                position.x, position.y
            )));
        }
        self.registry.update_position(player, position);
        Ok(())
    }

    async fn send_others(&mut self, player: &str) -> Result<(), SessionError> {
        let others: Vec<Position> = self
            .registry
            .list_others(player)
            .iter()
            .map(|p| p.position)
            .collect();
        self.wire.send(&protocol::encode_positions(&others)).await?;
        Ok(())
    }

    fn log_end(&self, reason: &SessionError) {
        let player = self.bound.as_deref().unwrap_or("-");
        match reason {
            SessionError::Timeout(_) | SessionError::ConnectionClosed => {
                tracing::info!(player, "session ended: {}", reason)
            }
            SessionError::ProtocolViolation(_)
            | SessionError::AuthenticationFailed(_)
            | SessionError::Io(_) => tracing::warn!(player, "session terminated: {}", reason),
        }
    }

    fn release(&mut self) -> Result<(), SessionFault> {
        let Some(name) = self.bound.take() else {
            return Ok(());
        };
        match self.registry.try_logout(&name) {
            LogoutOutcome::LoggedOut => {
                tracing::info!(player = %name, "logged out");
                Ok(())
            }
            LogoutOutcome::AlreadyLoggedOut => {
                tracing::debug!(player = %name, "already logged out");
                Ok(())
            }
            LogoutOutcome::Conflict => {
                tracing::warn!(player = %name, "logout swap lost a race, leaving record as is");
                Ok(())
            }
            LogoutOutcome::Missing => Err(SessionFault::RecordVanished(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_roster;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    const LONG: Duration = Duration::from_secs(5);

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::with_players(default_roster()))
    }

    fn start(
        registry: Arc<Registry>,
        read_timeout: Duration,
    ) -> (WireStream<DuplexStream>, JoinHandle<Result<(), SessionFault>>) {
        let (client, server) = tokio::io::duplex(4096);
        let session = Session::new(WireStream::new(server, read_timeout, LONG), registry);
        let task = tokio::spawn(session.run());
        (WireStream::new(client, LONG, LONG), task)
    }

    fn password(p: &str) -> PasswordSlot {
        PasswordSlot::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);

        assert_eq!(protocol::handshake(&mut client).await.unwrap(), SERVER_HANDSHAKE);
        assert!(protocol::login(&mut client, "James", &password("jamespass")).await.unwrap());
        assert!(reg.find("James").unwrap().logged_in);

        let others = protocol::exchange(&mut client, Position::new(1.0, 2.0)).await.unwrap();
        assert_eq!(others, vec![Position::new(400.0, 300.0)]);
        assert_eq!(reg.find("James").unwrap().position, Position::new(1.0, 2.0));

        let others = protocol::exchange(&mut client, Position::new(3.0, 4.0)).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(reg.find("James").unwrap().position, Position::new(3.0, 4.0));

        drop(client);
        task.await.unwrap().unwrap();
        assert!(!reg.find("James").unwrap().logged_in);
    }

    #[tokio::test]
    async fn test_steps_advance_phases_in_order() {
        let reg = registry();
        let (client, server) = tokio::io::duplex(4096);
        let mut client = WireStream::new(client, LONG, LONG);
        let mut session = Session::new(WireStream::new(server, LONG, LONG), reg.clone());
        assert_eq!(session.phase(), &Phase::Authenticating);

        client.send_i32(CLIENT_HANDSHAKE).await.unwrap();
        assert_eq!(session.step().await.unwrap(), &Phase::LoggingIn);
        assert_eq!(client.read_i32().await.unwrap(), SERVER_HANDSHAKE);

        client
            .send(&protocol::encode_login("Gleb", &password("glebpass")))
            .await
            .unwrap();
        let exchanging = Phase::Exchanging {
            player: "Gleb".into(),
        };
        assert_eq!(session.step().await.unwrap(), &exchanging);
        assert_eq!(client.read_i32().await.unwrap(), LOGIN_SUCCESS);
        assert_eq!(session.bound_name(), Some("Gleb"));

        let pos = [9.0f32.to_le_bytes(), 9.0f32.to_le_bytes()].concat();
        client.send(&pos).await.unwrap();
        assert_eq!(session.step().await.unwrap(), &exchanging);
        assert_eq!(client.read_i32().await.unwrap(), 1);
        assert_eq!(client.read_position().await.unwrap(), Position::new(200.0, 200.0));
        assert_eq!(reg.find("Gleb").unwrap().position, Position::new(9.0, 9.0));
    }

    #[tokio::test]
    async fn test_bad_handshake_closes_without_reply() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        client.send_i32(42).await.unwrap();
        assert!(matches!(client.read_i32().await, Err(WireError::ConnectionClosed)));
        task.await.unwrap().unwrap();
        assert_eq!(reg.logged_in_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_name_is_rejected() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        assert_eq!(protocol::handshake(&mut client).await.unwrap(), SERVER_HANDSHAKE);

        client.send_i32(33).await.unwrap();
        assert!(matches!(client.read_i32().await, Err(WireError::ConnectionClosed)));
        task.await.unwrap().unwrap();
        assert_eq!(reg.logged_in_count(), 0);
    }

    #[tokio::test]
    async fn test_negative_name_length_is_rejected() {
        let reg = registry();
        let (mut client, task) = start(reg, LONG);
        protocol::handshake(&mut client).await.unwrap();
        client.send_i32(-1).await.unwrap();
        assert!(matches!(client.read_i32().await, Err(WireError::ConnectionClosed)));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        protocol::handshake(&mut client).await.unwrap();
        assert!(!protocol::login(&mut client, "James", &password("glebpass")).await.unwrap());
        task.await.unwrap().unwrap();
        assert!(!reg.find("James").unwrap().logged_in);
    }

    #[tokio::test]
    async fn test_unknown_player() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        protocol::handshake(&mut client).await.unwrap();
        assert!(!protocol::login(&mut client, "Mallory", &password("x")).await.unwrap());
        task.await.unwrap().unwrap();
        assert!(reg.find("Mallory").is_none());
    }

    #[tokio::test]
    async fn test_rejected_duplicate_leaves_existing_login_alone() {
        let reg = registry();
        assert!(reg.try_login("James"));

        let (mut client, task) = start(reg.clone(), LONG);
        protocol::handshake(&mut client).await.unwrap();
        assert!(!protocol::login(&mut client, "James", &password("jamespass")).await.unwrap());
        task.await.unwrap().unwrap();

        assert!(reg.find("James").unwrap().logged_in);
    }

    #[tokio::test]
    async fn test_stalled_client_is_evicted_and_logged_out() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), Duration::from_millis(100));
        protocol::handshake(&mut client).await.unwrap();
        assert!(protocol::login(&mut client, "Gleb", &password("glebpass")).await.unwrap());
        assert!(reg.find("Gleb").unwrap().logged_in);

        task.await.unwrap().unwrap();
        assert!(!reg.find("Gleb").unwrap().logged_in);
        assert!(matches!(client.read_i32().await, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_non_finite_position_ends_session() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        protocol::handshake(&mut client).await.unwrap();
        assert!(protocol::login(&mut client, "James", &password("jamespass")).await.unwrap());

        let err = protocol::exchange(&mut client, Position::new(f32::NAN, 0.0)).await;
        assert!(matches!(err, Err(WireError::ConnectionClosed)));
        task.await.unwrap().unwrap();

        let james = reg.find("James").unwrap();
        assert!(!james.logged_in);
        assert_eq!(james.position, Position::new(200.0, 200.0));
    }

    #[tokio::test]
    async fn test_vanished_record_is_a_fault() {
        let reg = registry();
        let (mut client, task) = start(reg.clone(), LONG);
        protocol::handshake(&mut client).await.unwrap();
        assert!(protocol::login(&mut client, "James", &password("jamespass")).await.unwrap());

        reg.reset();
        drop(client);
        assert!(matches!(
            task.await.unwrap(),
            Err(SessionFault::RecordVanished(name)) if name == "James"
        ));
    }
}
