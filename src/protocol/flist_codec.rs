//! Wire encoding for synthesized file-list entries.
//!
//! Every entry is sent as a small fixed-shape record: flags, a one-byte
//! name length, the name itself, then varint/varlong-encoded size, mtime
//! and mode. The list is terminated by a single zero byte (a zero-length
//! name with no flags), which must be written even if synthesis bailed
//! out early with a multiplexed error — there is no partial file list on
//! this wire, only an empty one.

use crate::error::{DaemonError, Result};
use crate::protocol::flist::Entry;
use crate::protocol::mux::MuxReader;
use crate::protocol::transport::Transport;
use crate::protocol::varint::{encode_varint, encode_varlong};

/// `XMIT_TOP_DIR | XMIT_EXTENDED_FLAGS | XMIT_SAME_UID | XMIT_SAME_GID | XMIT_MOD_NSEC`
const DIRECTORY_FLAGS: u16 = 0x201b;
/// `XMIT_EXTENDED_FLAGS | XMIT_SAME_UID | XMIT_SAME_GID | XMIT_MOD_NSEC`
const FILE_FLAGS: u16 = 0x201a;

/// Write one entry's wire record: `u16 flags, u8 name_len, name,
/// varlong(size, min=3), varlong(mtime_sec, min=4), varint(mtime_nsec),
/// u32 mode`.
async fn write_entry<T: Transport>(reader: &mut MuxReader<T>, entry: &Entry) -> Result<()> {
    let name = entry.name();
    if name.len() > 255 {
        return Err(DaemonError::Framing(format!(
            "entry name {name:?} is {} bytes, over the 255-byte wire limit",
            name.len()
        )));
    }

    let flags = if entry.is_directory() {
        DIRECTORY_FLAGS
    } else {
        FILE_FLAGS
    };

    let mut record = Vec::new();
    record.extend_from_slice(&flags.to_le_bytes());
    record.push(name.len() as u8);
    record.extend_from_slice(name.as_bytes());
    record.extend(encode_varlong(entry.size(), 3));
    record.extend(encode_varlong(entry.mtime_sec() as u64, 4));
    record.extend(encode_varint(entry.mtime_nsec()));
    record.extend_from_slice(&entry.mode().to_le_bytes());

    crate::protocol::mux::write_mux(reader.transport_mut(), crate::protocol::mux::TAG_DATA, &record).await
}

/// Write the whole file list: one record per entry, lexicographically
/// sorted by name, followed by the zero-byte terminator.
///
/// Terminates the list even when `entries` is empty, which is exactly
/// what happens after a synthesis error already reported over the mux
/// error channel.
pub async fn write_file_list<T: Transport>(
    reader: &mut MuxReader<T>,
    entries: &[Entry],
) -> Result<()> {
    let result = write_entries(reader, entries).await;
    crate::protocol::mux::write_mux(reader.transport_mut(), crate::protocol::mux::TAG_DATA, &[0u8])
        .await?;
    result
}

async fn write_entries<T: Transport>(reader: &mut MuxReader<T>, entries: &[Entry]) -> Result<()> {
    for entry in entries {
        write_entry(reader, entry).await?;
    }
    Ok(())
}
