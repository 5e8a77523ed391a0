//! Framed message transport over a byte stream.
//!
//! A [`Connection`] splits a stream into a buffered frame reader and a frame
//! writer. Reads are cancel-safe: a read abandoned by a timeout keeps any
//! partial frame in the buffer, so the very short poll reads of the server
//! loop never lose data.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::codec;
use crate::error::{Result, SyncError};
use crate::messages::limits::MAX_READ_LEN;
use crate::messages::ReconMsg;

/// Any byte stream a reconciliation session can run over.
pub trait ReconStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ReconStream for T {}

/// Reading side of a connection.
pub struct FrameReader<S> {
    inner: ReadHalf<S>,
    buf: BytesMut,
}

impl<S: ReconStream> FrameReader<S> {
    /// Read the next message.
    pub async fn read_msg(&mut self) -> Result<ReconMsg> {
        loop {
            if let Some(msg) = codec::decode_frame(&mut self.buf)? {
                return Ok(msg);
            }
            self.fill().await?;
        }
    }

    /// Read the next message, failing with `Timeout` after `limit`.
    pub async fn read_msg_timeout(&mut self, limit: Duration) -> Result<ReconMsg> {
        tokio::time::timeout(limit, self.read_msg()).await?
    }

    /// Read the next message if one arrives within `limit`.
    pub async fn poll_msg(&mut self, limit: Duration) -> Result<Option<ReconMsg>> {
        match tokio::time::timeout(limit, self.read_msg()).await {
            Ok(msg) => msg.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Read a bare length-prefixed string, as used by the handshake.
    pub async fn read_string(&mut self) -> Result<String> {
        while self.buf.len() < 4 {
            self.fill().await?;
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_READ_LEN {
            return Err(SyncError::Codec(format!(
                "read length {} exceeds maximum limit",
                len
            )));
        }
        while self.buf.len() < 4 + len {
            self.fill().await?;
        }
        self.buf.advance(4);
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|e| SyncError::Codec(e.to_string()))
    }

    async fn fill(&mut self) -> Result<()> {
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        Ok(())
    }
}

/// Writing side of a connection. Messages are buffered until [`flush`].
///
/// [`flush`]: FrameWriter::flush
pub struct FrameWriter<S> {
    inner: WriteHalf<S>,
    buf: BytesMut,
}

impl<S: ReconStream> FrameWriter<S> {
    /// Queue a message.
    pub fn push(&mut self, msg: &ReconMsg) -> Result<()> {
        codec::encode_frame(msg, &mut self.buf)
    }

    /// Queue a bare length-prefixed string.
    pub fn push_string(&mut self, text: &str) -> Result<()> {
        codec::put_string(&mut self.buf, text)
    }

    /// Write everything queued.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Queue and write messages.
    pub async fn write_msgs(&mut self, msgs: &[ReconMsg]) -> Result<()> {
        for msg in msgs {
            self.push(msg)?;
        }
        self.flush().await
    }

    /// Close the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// A framed, split connection to a remote peer.
pub struct Connection<S> {
    pub reader: FrameReader<S>,
    pub writer: FrameWriter<S>,
    remote_addr: SocketAddr,
}

impl<S: ReconStream> Connection<S> {
    pub fn new(stream: S, remote_addr: SocketAddr) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader {
                inner: read,
                buf: BytesMut::with_capacity(8 * 1024),
            },
            writer: FrameWriter {
                inner: write,
                buf: BytesMut::new(),
            },
            remote_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// In-memory connections for testing.
pub mod memory {
    use std::net::{Ipv4Addr, SocketAddr};

    use tokio::io::DuplexStream;

    use super::Connection;

    const PIPE_CAPACITY: usize = 64 * 1024;

    /// Two connected ends, as if `a` dialed `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        (Connection::new(left, b), Connection::new(right, a))
    }

    /// A pair on loopback addresses.
    pub fn loopback_pair() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        pair(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 40001)),
            SocketAddr::from((Ipv4Addr::LOCALHOST, 11370)),
        )
    }
}
