//! Block-transfer phase: decode the client's running-index stream and
//! stream each requested file back in full.
//!
//! There is no delta transfer here — every block-sum header and checksum
//! list the client sends is read and discarded; the sender always
//! responds with the complete file content followed by a literal-run
//! terminator token and an MD5 of what it sent.

use crate::backend::Backend;
use crate::error::{DaemonError, Result};
use crate::protocol::flist::Entry;
use crate::protocol::mux::{self, MuxReader};
use crate::protocol::transport::Transport;

/// `write_mux` frames carrying file data are capped at this many bytes.
const FRAME_CAP: usize = 524_288;
const READ_CHUNK: usize = 65_536;

/// Drive the block-transfer phase to completion against `entries`, the
/// already wire-sorted file list sent to the client.
pub async fn run<T: Transport>(
    reader: &mut MuxReader<T>,
    backend: &dyn Backend,
    module: &str,
    entries: &[Entry],
) -> Result<()> {
    let mut findex: i64 = -1;

    loop {
        let mut lead = [0u8; 1];
        reader.read_exact(&mut lead).await?;
        let b0 = lead[0];

        if b0 == 0 {
            return Ok(());
        }

        let ndx_prefix = if b0 <= 0xfd {
            findex += i64::from(b0);
            vec![b0]
        } else if b0 == 0xfe {
            let mut b12 = [0u8; 2];
            reader.read_exact(&mut b12).await?;
            if b12[0] & 0x80 != 0 {
                let mut b34 = [0u8; 2];
                reader.read_exact(&mut b34).await?;
                let absolute = u32::from_le_bytes([b12[1], b34[0], b34[1], b12[0] & 0x7f]);
                findex = i64::from(absolute);
                vec![b0, b12[0], b12[1], b34[0], b34[1]]
            } else {
                let delta = (i64::from(b12[0]) << 8) | i64::from(b12[1]);
                findex += delta;
                vec![b0, b12[0], b12[1]]
            }
        } else {
            mux::send_error(reader.transport_mut(), "negative indexes are not supported").await?;
            return Err(DaemonError::NegativeIndex);
        };

        let mut flags_buf = [0u8; 2];
        reader.read_exact(&mut flags_buf).await?;

        let entry = usize::try_from(findex)
            .ok()
            .and_then(|i| entries.get(i))
            .ok_or(DaemonError::InvalidIndex(findex))?;

        if entry.is_directory() {
            let mut response = ndx_prefix;
            response.extend_from_slice(&flags_buf);
            mux::write_mux(reader.transport_mut(), mux::TAG_DATA, &response).await?;
            continue;
        }

        let mut sum_header = [0u8; 16];
        reader.read_exact(&mut sum_header).await?;
        let sum_count = u32::from_le_bytes(sum_header[0..4].try_into().unwrap());
        let sum_blength = u32::from_le_bytes(sum_header[4..8].try_into().unwrap());
        let sum_s2length = u32::from_le_bytes(sum_header[8..12].try_into().unwrap());
        let sum_remainder = u32::from_le_bytes(sum_header[12..16].try_into().unwrap());

        let checksum_list_len = sum_count as usize * (4 + sum_s2length as usize);
        reader.skip(checksum_list_len).await?;

        let Entry::File { artifact, .. } = entry else {
            unreachable!("directory case handled above")
        };
        let artifact = artifact.clone();
        let mut body = backend.open_artifact(module, &artifact.relative_path).await?;

        let mut frame = Vec::with_capacity(FRAME_CAP);
        frame.extend_from_slice(&ndx_prefix);
        frame.extend_from_slice(&flags_buf);
        frame.extend_from_slice(&sum_count.to_le_bytes());
        frame.extend_from_slice(&sum_blength.to_le_bytes());
        frame.extend_from_slice(&sum_s2length.to_le_bytes());
        frame.extend_from_slice(&sum_remainder.to_le_bytes());
        frame.extend_from_slice(&(artifact.size as u32).to_le_bytes());

        let mut digest = md5::Context::new();
        let mut scratch = vec![0u8; READ_CHUNK];
        loop {
            let n = body.read(&mut scratch).await.map_err(DaemonError::Io)?;
            if n == 0 {
                break;
            }
            digest.consume(&scratch[..n]);
            frame.extend_from_slice(&scratch[..n]);
            flush_full_frames(reader, &mut frame).await?;
        }

        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&digest.compute().0);
        flush_remainder(reader, &mut frame).await?;
    }
}

async fn flush_full_frames<T: Transport>(reader: &mut MuxReader<T>, buf: &mut Vec<u8>) -> Result<()> {
    while buf.len() >= FRAME_CAP {
        let frame: Vec<u8> = buf.drain(..FRAME_CAP).collect();
        mux::write_mux(reader.transport_mut(), mux::TAG_DATA, &frame).await?;
    }
    Ok(())
}

async fn flush_remainder<T: Transport>(reader: &mut MuxReader<T>, buf: &mut Vec<u8>) -> Result<()> {
    flush_full_frames(reader, buf).await?;
    if !buf.is_empty() {
        mux::write_mux(reader.transport_mut(), mux::TAG_DATA, buf).await?;
        buf.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Artifact, MemoryBackend};
    use crate::protocol::transport::MemoryTransport;

    fn file_entry(path: &str, bytes: &[u8]) -> Entry {
        Entry::File {
            name: path.to_owned(),
            artifact: Artifact {
                relative_path: path.to_owned(),
                size: bytes.len() as u64,
                mtime_sec: 1,
                mtime_nsec: 0,
                md5: md5::compute(bytes).into(),
            },
        }
    }

    fn dir_entry(name: &str) -> Entry {
        Entry::Directory {
            name: name.to_owned(),
            mtime_sec: 1,
            mtime_nsec: 0,
        }
    }

    fn sum_header_record() -> Vec<u8> {
        // count=0, blength=0, s2length=0, remainder=0: no checksum list to skip.
        vec![0u8; 16]
    }

    #[compio::test]
    async fn single_small_file_round_trips_and_terminates() {
        let mut backend = MemoryBackend::new();
        backend.add_module("M", false, vec![(
            Artifact {
                relative_path: "a.txt".to_owned(),
                size: 3,
                mtime_sec: 1,
                mtime_nsec: 0,
                md5: md5::compute(b"foo").into(),
            },
            b"foo".to_vec(),
        )]);
        let entries = vec![file_entry("a.txt", b"foo")];

        let mut wire = Vec::new();
        wire.push(1u8); // findex delta -> index 0
        wire.extend_from_slice(&0u16.to_le_bytes()); // flags
        wire.extend(sum_header_record());
        wire.push(0u8); // terminate phase 1

        let mut reader = MuxReader::new(MemoryTransport::new(wire));
        run(&mut reader, &backend, "M", &entries).await.unwrap();

        let out = reader.into_inner().outbound;
        // one data frame for the file response; verify it ends with the
        // zero token and the correct MD5.
        let expected_md5 = md5::compute(b"foo").0;
        assert!(out.windows(16).any(|w| w == expected_md5));
    }

    #[compio::test]
    async fn directory_entry_is_echoed_without_file_data() {
        let backend = MemoryBackend::new();
        let entries = vec![dir_entry("dir")];

        let mut wire = Vec::new();
        wire.push(1u8);
        wire.extend_from_slice(&0x1234u16.to_le_bytes());
        wire.push(0u8);

        let mut reader = MuxReader::new(MemoryTransport::new(wire));
        run(&mut reader, &backend, "M", &entries).await.unwrap();

        let out = reader.into_inner().outbound;
        // mux header (4 bytes) + echoed index byte + echoed flags (2 bytes) == 7
        assert_eq!(out.len(), 7);
        assert_eq!(&out[4..], [1u8, 0x34, 0x12]);
    }

    #[compio::test]
    async fn negative_index_marker_is_rejected() {
        let backend = MemoryBackend::new();
        let entries: Vec<Entry> = vec![];
        let wire = vec![0xffu8];
        let mut reader = MuxReader::new(MemoryTransport::new(wire));
        let err = run(&mut reader, &backend, "M", &entries).await.unwrap_err();
        assert!(matches!(err, DaemonError::NegativeIndex));
    }

    #[compio::test]
    async fn extended_index_marker_sets_absolute_index() {
        let mut backend = MemoryBackend::new();
        backend.add_module(
            "M",
            false,
            vec![(
                Artifact {
                    relative_path: "z.txt".to_owned(),
                    size: 1,
                    mtime_sec: 1,
                    mtime_nsec: 0,
                    md5: md5::compute(b"z").into(),
                },
                b"z".to_vec(),
            )],
        );
        let entries = vec![file_entry("z.txt", b"z")];

        // 0xfe with b1's high bit set -> absolute index assembled from
        // b2,b3,b4,(b1&0x7f), little-endian. We want absolute index 0.
        let mut wire = Vec::new();
        wire.push(0xfe);
        wire.push(0x80); // b1, high bit set, low 7 bits 0
        wire.push(0x00); // b2
        wire.push(0x00); // b3
        wire.push(0x00); // b4
        wire.extend_from_slice(&0u16.to_le_bytes());
        wire.extend(sum_header_record());
        wire.push(0u8);

        let mut reader = MuxReader::new(MemoryTransport::new(wire));
        run(&mut reader, &backend, "M", &entries).await.unwrap();
        let out = reader.into_inner().outbound;
        assert!(!out.is_empty());
    }

    #[compio::test]
    async fn large_file_is_chunked_across_multiple_frames() {
        let bytes = vec![0x5au8; FRAME_CAP + 10];
        let mut backend = MemoryBackend::new();
        backend.add_module(
            "M",
            false,
            vec![(
                Artifact {
                    relative_path: "big.bin".to_owned(),
                    size: bytes.len() as u64,
                    mtime_sec: 1,
                    mtime_nsec: 0,
                    md5: md5::compute(&bytes).into(),
                },
                bytes.clone(),
            )],
        );
        let entries = vec![file_entry("big.bin", &bytes)];

        let mut wire = Vec::new();
        wire.push(1u8);
        wire.extend_from_slice(&0u16.to_le_bytes());
        wire.extend(sum_header_record());
        wire.push(0u8);

        let mut reader = MuxReader::new(MemoryTransport::new(wire));
        run(&mut reader, &backend, "M", &entries).await.unwrap();

        let out = reader.into_inner().outbound;
        // With a payload this large we must have emitted more than one
        // write_mux frame (each frame header is 4 bytes); a single frame
        // could not carry FRAME_CAP+10 payload bytes plus the response
        // header, token and MD5 trailer.
        let mut frame_count = 0;
        let mut pos = 0;
        while pos + 4 <= out.len() {
            let len = u32::from_le_bytes([out[pos], out[pos + 1], out[pos + 2], 0]) as usize;
            pos += 4 + len;
            frame_count += 1;
        }
        assert!(frame_count >= 2, "expected chunking across frames, got {frame_count}");
    }
}
