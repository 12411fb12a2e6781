//! Multiplexed framing layer
//!
//! Once the argument and filter block has been read (§ handshake), every
//! byte exchanged with the client is wrapped in a `(len, tag, payload)`
//! record: a 3-byte little-endian length, a 1-byte tag, then `len` bytes
//! of payload. Tag 7 carries data, tag 8 carries an error line, tag 93
//! signals the peer is exiting.
//!
//! The source this protocol is modeled on swaps one stream reader for
//! another at the point muxing turns on. [`MuxReader`] plays the same
//! role here: it takes ownership of the (now framed) transport and
//! presents a plain `read(buf)` surface to everything downstream,
//! transparently unwrapping tag-7 frames and discarding or erroring on
//! the rest.

use crate::error::{DaemonError, Result};
use crate::protocol::transport::{read_exact, write_all, Transport};
use tracing::{debug, warn};

/// Regular data payload.
pub const TAG_DATA: u8 = 7;
/// An error line, rendered by the client but not fatal on its own.
pub const TAG_ERROR: u8 = 8;
/// The peer is exiting (`MSG_ERROR_EXIT`); no further frames follow.
pub const TAG_EXIT: u8 = 93;

/// Largest payload a single frame's 3-byte length field can carry.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

/// Write one multiplexed frame: 3-byte LE length, 1-byte tag, payload.
pub async fn write_mux<T: Transport + ?Sized>(transport: &mut T, tag: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(DaemonError::Framing(format!(
            "frame of {} bytes exceeds the 3-byte length field",
            payload.len()
        )));
    }
    let len = (payload.len() as u32).to_le_bytes();
    write_all(transport, &len[..3]).await?;
    write_all(transport, &[tag]).await?;
    if !payload.is_empty() {
        write_all(transport, payload).await?;
    }
    Ok(())
}

/// Multiplex an error line (tag 8) to the client; a trailing newline is
/// appended if the caller didn't already include one.
pub async fn send_error<T: Transport + ?Sized>(transport: &mut T, message: &str) -> Result<()> {
    let mut line = message.to_owned();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    write_mux(transport, TAG_ERROR, line.as_bytes()).await
}

/// A reader that sits in front of a transport once muxing is active,
/// unwrapping `(len, tag, payload)` frames and exposing only tag-7
/// payload bytes to its caller.
///
/// Buffers at most one frame's worth of unread payload at a time. The
/// underlying transport is also used for outbound [`write_mux`] calls, so
/// callers reach it back via [`MuxReader::transport_mut`] rather than this
/// type owning a separate writer.
pub struct MuxReader<T: Transport> {
    transport: T,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl<T: Transport> MuxReader<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    /// Access the wrapped transport for writing frames or error lines.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the reader, returning the underlying transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Read up to `buf.len()` bytes of demultiplexed tag-7 data.
    ///
    /// Pulls and discards/logs non-data frames until it either has data to
    /// return or the peer signals exit (tag 93), which surfaces as
    /// [`DaemonError::ClientErrorExit`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending_pos >= self.pending.len() {
            self.fill().await?;
        }
        let available = self.pending.len() - self.pending_pos;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        Ok(n)
    }

    /// Read exactly `buf.len()` demultiplexed bytes.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.read(&mut buf[offset..]).await?;
            if n == 0 {
                return Err(DaemonError::ConnectionClosedByPeer);
            }
            offset += n;
        }
        Ok(())
    }

    /// Read and discard exactly `count` demultiplexed bytes.
    pub async fn skip(&mut self, count: usize) -> Result<()> {
        let mut remaining = count;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            self.read_exact(&mut scratch[..chunk]).await?;
            remaining -= chunk;
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<()> {
        loop {
            let mut header = [0u8; 4];
            read_exact(&mut self.transport, &mut header).await?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            let tag = header[3];

            let mut payload = vec![0u8; len];
            if len > 0 {
                read_exact(&mut self.transport, &mut payload).await?;
            }

            match tag {
                TAG_DATA => {
                    self.pending = payload;
                    self.pending_pos = 0;
                    return Ok(());
                }
                TAG_EXIT => {
                    return Err(DaemonError::ClientErrorExit);
                }
                other => {
                    debug!(tag = other, len, "discarding non-data mux frame");
                    warn!(tag = other, "unexpected mux tag from client");
                }
            }
        }
    }
}
