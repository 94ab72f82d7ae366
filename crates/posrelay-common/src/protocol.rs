use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{self, WireError, WireStream};
use crate::player::{PasswordSlot, Position};

// -- Constants --

/// First value a client sends on a fresh connection.
pub const CLIENT_HANDSHAKE: i32 = 390_458;
/// The server's answer to a valid client handshake.
pub const SERVER_HANDSHAKE: i32 = -283_947;
/// Sent once after a successful login. Failure has no payload; the socket closes.
pub const LOGIN_SUCCESS: i32 = 1337;

pub const MAX_NAME_LEN: usize = 32;
pub const PASSWORD_SLOT_LEN: usize = 128;

// -- Encoding --

/// Name length, name bytes, then the 128-byte password slot.
pub fn encode_login(name: &str, password: &PasswordSlot) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + name.len() + PASSWORD_SLOT_LEN);
    codec::put_i32(&mut buf, name.len() as i32);
    codec::put_bytes(&mut buf, name.as_bytes());
    codec::put_bytes(&mut buf, password.as_bytes());
    buf
}

/// Player count followed by one `(x, y)` pair per player, in order.
pub fn encode_positions(positions: &[Position]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + positions.len() * 8);
    codec::put_i32(&mut buf, positions.len() as i32);
    for pos in positions {
        codec::put_position(&mut buf, *pos);
    }
    buf
}

// -- Client-side helpers --

/// Sends the client handshake and returns whatever the server answered.
pub async fn handshake<S>(wire: &mut WireStream<S>) -> Result<i32, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire.send_i32(CLIENT_HANDSHAKE).await?;
    wire.read_i32().await
}

/// Returns `Ok(false)` when the server rejects the login by closing the socket.
pub async fn login<S>(
    wire: &mut WireStream<S>,
    name: &str,
    password: &PasswordSlot,
) -> Result<bool, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire.send(&encode_login(name, password)).await?;
    match wire.read_i32().await {
        Ok(reply) => Ok(reply == LOGIN_SUCCESS),
        Err(WireError::ConnectionClosed) => Ok(false),
        Err(e) => Err(e),
    }
}

/// One round of the exchange loop: report our position, receive everyone else's.
pub async fn exchange<S>(
    wire: &mut WireStream<S>,
    own: Position,
) -> Result<Vec<Position>, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8);
    codec::put_position(&mut buf, own);
    wire.send(&buf).await?;

    let count = wire.read_i32().await?;
    if count < 0 {
        return Err(WireError::NegativeLength(count));
    }
    let mut others = Vec::new();
    for _ in 0..count {
        others.push(wire.read_position().await?);
    }
    Ok(others)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    #[test]
    fn test_login_layout() {
        let slot = PasswordSlot::new("jamespass").unwrap();
        let mut buf = encode_login("James", &slot).freeze();
        assert_eq!(buf.len(), 4 + 5 + PASSWORD_SLOT_LEN);
        assert_eq!(codec::get_i32(&mut buf), Some(5));
        assert_eq!(&buf[..5], b"James");
        buf.advance(5);
        assert_eq!(&buf[..], &slot.as_bytes()[..]);
    }

    #[test]
    fn test_positions_layout() {
        let mut buf = encode_positions(&[Position::new(400.0, 300.0), Position::new(-1.0, 44.0)]).freeze();
        assert_eq!(codec::get_i32(&mut buf), Some(2));
        assert_eq!(codec::get_position(&mut buf), Some(Position::new(400.0, 300.0)));
        assert_eq!(codec::get_position(&mut buf), Some(Position::new(-1.0, 44.0)));
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_empty_positions_is_just_a_count() {
        assert_eq!(&encode_positions(&[])[..], &[0, 0, 0, 0]);
    }
}
