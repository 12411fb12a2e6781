//! Generic transport abstraction for the rsync wire protocol
//!
//! The daemon protocol is transport-agnostic in principle - it works over
//! any bidirectional byte stream. In practice this crate only ever speaks
//! it over TCP, but keeping the protocol logic behind a borrowed-slice
//! `Transport` seam (rather than compio's ownership-passing `AsyncRead`/
//! `AsyncWrite`) keeps the session driver free of buffer juggling and
//! makes it straightforward to drive with an in-memory transport in tests.

use crate::error::{DaemonError, Result};
use async_trait::async_trait;

/// A bidirectional byte stream that can carry daemon protocol messages.
#[async_trait]
pub trait Transport: Send {
    /// Read some bytes into `buf`, returning the number read (0 at EOF).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write some bytes from `buf`, returning the number written.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush any buffered writes.
    async fn flush(&mut self) -> Result<()>;

    /// Transport name, used in log spans.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Read exactly `buf.len()` bytes, treating a mid-read EOF as
/// [`DaemonError::ConnectionClosedByPeer`].
pub async fn read_exact<T: Transport + ?Sized>(transport: &mut T, buf: &mut [u8]) -> Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = transport.read(&mut buf[offset..]).await?;
        if n == 0 {
            return Err(DaemonError::ConnectionClosedByPeer);
        }
        offset += n;
    }
    Ok(())
}

/// Write the whole buffer, looping over short writes, then flush.
pub async fn write_all<T: Transport + ?Sized>(transport: &mut T, buf: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        let n = transport.write(&buf[offset..]).await?;
        if n == 0 {
            return Err(DaemonError::ConnectionClosedByPeer);
        }
        offset += n;
    }
    transport.flush().await
}

/// Read a single LF-terminated banner line (the LF is not included).
///
/// Used only during the handshake, before muxing is enabled.
pub async fn read_line<T: Transport + ?Sized>(transport: &mut T) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = transport.read(&mut byte).await?;
        if n == 0 {
            return Err(DaemonError::ConnectionClosedByPeer);
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// A [`Transport`] backed by a live TCP connection.
///
/// compio's `AsyncRead`/`AsyncWrite` pass buffers by value (required for
/// `io_uring`, which needs a stable buffer for the lifetime of the
/// operation), so this wrapper owns a scratch `Vec<u8>` and copies into the
/// caller's slice after each operation completes.
pub struct TcpTransport {
    stream: compio::net::TcpStream,
    peer: String,
}

impl TcpTransport {
    #[must_use]
    pub fn new(stream: compio::net::TcpStream, peer: String) -> Self {
        Self { stream, peer }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use compio::io::AsyncRead;
        let scratch = vec![0u8; buf.len()];
        let (n, scratch) = self.stream.read(scratch).await.into_inner();
        let n = n?;
        buf[..n].copy_from_slice(&scratch[..n]);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use compio::io::AsyncWrite;
        let (n, _) = self.stream.write(buf.to_vec()).await.into_inner();
        Ok(n?)
    }

    async fn flush(&mut self) -> Result<()> {
        use compio::io::AsyncWrite;
        self.stream.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.peer
    }
}

/// A [`Transport`] backed by two in-memory byte queues, for tests.
///
/// Reads drain `inbound`; writes append to `outbound`. Used by session
/// tests to script a full client exchange without a socket.
#[cfg(test)]
pub struct MemoryTransport {
    pub inbound: std::collections::VecDeque<u8>,
    pub outbound: Vec<u8>,
}

#[cfg(test)]
impl MemoryTransport {
    #[must_use]
    pub fn new(inbound: Vec<u8>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: Vec::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MemoryTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn read_exact_reads_across_short_reads() {
        let mut t = MemoryTransport::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 5];
        read_exact(&mut t, &mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[compio::test]
    async fn read_exact_reports_peer_close_on_short_input() {
        let mut t = MemoryTransport::new(vec![1, 2]);
        let mut buf = [0u8; 5];
        let err = read_exact(&mut t, &mut buf).await.unwrap_err();
        assert!(matches!(err, DaemonError::ConnectionClosedByPeer));
    }

    #[compio::test]
    async fn write_all_appends_to_outbound() {
        let mut t = MemoryTransport::new(vec![]);
        write_all(&mut t, &[9, 9, 9]).await.unwrap();
        assert_eq!(t.outbound, vec![9, 9, 9]);
    }

    #[compio::test]
    async fn read_line_stops_at_lf_and_excludes_it() {
        let mut t = MemoryTransport::new(b"@RSYNCD: 30.0\nrest".to_vec());
        let line = read_line(&mut t).await.unwrap();
        assert_eq!(line, "@RSYNCD: 30.0");
    }
}
