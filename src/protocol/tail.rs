//! Tail sequence: the three null handshakes and the statistics block that
//! close out a session after the block-transfer phase.
//!
//! Every step here mirrors the same shape: read one `0x00` byte from the
//! client, write one `0x00`-payload frame back. The statistics block
//! replaces real byte/speed counters with fifteen zero bytes — this
//! daemon deliberately doesn't track transfer statistics.

use crate::error::{DaemonError, Result};
use crate::protocol::mux::{self, MuxReader};
use crate::protocol::transport::Transport;

async fn null_exchange<T: Transport>(reader: &mut MuxReader<T>) -> Result<()> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte).await?;
    if byte[0] != 0 {
        return Err(DaemonError::Framing(format!(
            "expected a null handshake byte, got {:#x}",
            byte[0]
        )));
    }
    mux::write_mux(reader.transport_mut(), mux::TAG_DATA, &[0u8]).await
}

/// Run phase-2, end-of-transfer, statistics and farewell, in order.
pub async fn run<T: Transport>(reader: &mut MuxReader<T>) -> Result<()> {
    null_exchange(reader).await?; // phase 2
    null_exchange(reader).await?; // end of transfer

    // Five placeholder varlongs (total bytes, matched data, literal data,
    // flushed data, file count), each written as a single 0x00 byte.
    mux::write_mux(reader.transport_mut(), mux::TAG_DATA, &[0u8; 15]).await?;

    null_exchange(reader).await?; // farewell
    Ok(())
}
