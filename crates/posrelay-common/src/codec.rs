//! Fixed-width little-endian wire codec.
//!
//! Two layers: pure `put_*`/`get_*` helpers over `bytes` buffers, and
//! [`WireStream`], which performs exact-length reads and whole-buffer writes
//! on an async stream with a deadline on every operation.

use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::player::Position;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => WireError::ConnectionClosed,
            _ => WireError::Io(e),
        }
    }
}

// -- Buffer helpers --

pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32_le(value);
}

pub fn put_f32(buf: &mut BytesMut, value: f32) {
    buf.put_f32_le(value);
}

pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_slice(bytes);
}

pub fn put_position(buf: &mut BytesMut, position: Position) {
    put_f32(buf, position.x);
    put_f32(buf, position.y);
}

pub fn get_i32(buf: &mut impl Buf) -> Option<i32> {
    (buf.remaining() >= 4).then(|| buf.get_i32_le())
}

pub fn get_f32(buf: &mut impl Buf) -> Option<f32> {
    (buf.remaining() >= 4).then(|| buf.get_f32_le())
}

pub fn get_position(buf: &mut impl Buf) -> Option<Position> {
    if buf.remaining() < 8 {
        return None;
    }
    Some(Position::new(buf.get_f32_le(), buf.get_f32_le()))
}

// -- Stream --

pub struct WireStream<S> {
    inner: S,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<S> WireStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
        }
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<(), WireError> {
        match tokio::time::timeout(self.read_timeout, self.inner.read_exact(buf)).await {
            Err(_) => Err(WireError::Timeout(self.read_timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Ok(()),
        }
    }

    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut buf = [0u8; N];
        self.read_into(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.read_array().await?))
    }

    pub async fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.read_array().await?))
    }

    pub async fn read_position(&mut self) -> Result<Position, WireError> {
        let x = self.read_f32().await?;
        let y = self.read_f32().await?;
        Ok(Position::new(x, y))
    }

    /// Reads exactly `len` bytes and decodes them as UTF-8. No terminator.
    pub async fn read_string(&mut self, len: usize) -> Result<String, WireError> {
        let bytes = self.read_bytes(len).await?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Writes the whole buffer and flushes it.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), WireError> {
        let limit = self.write_timeout;
        let inner = &mut self.inner;
        let write = async move {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        match tokio::time::timeout(limit, write).await {
            Err(_) => Err(WireError::Timeout(limit)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub async fn send_i32(&mut self, value: i32) -> Result<(), WireError> {
        self.send(&value.to_le_bytes()).await
    }

    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        match tokio::time::timeout(self.write_timeout, self.inner.shutdown()).await {
            Err(_) => Err(WireError::Timeout(self.write_timeout)),
            Ok(res) => res.map_err(WireError::from),
        }
    }
}
