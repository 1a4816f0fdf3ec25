//! Demultiplexer for the daemon's attach and log streams.
//!
//! With tty disabled the daemon interleaves stdout and stderr on one
//! connection, framing each chunk with an 8-byte header: stream id, three
//! zero bytes, and a big-endian payload length. The executor always runs
//! containers without a tty, so every output stream goes through here.

use crate::error::Result;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Which stream a demultiplexed frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_header(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// Upper bound on a single sink delivery; larger frames arrive in pieces.
const CHUNK_SIZE: usize = 32 * 1024;

/// Copies a multiplexed stream into `sink` until the remote side closes.
///
/// The sink receives each payload chunk tagged with its stream. Returns
/// the total number of payload bytes delivered. A truncated header or
/// payload surfaces as an error; a clean close between frames ends the
/// copy normally.
pub async fn demux_output<R>(mut reader: R, mut sink: impl FnMut(StreamKind, &[u8])) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        // Read one frame header, detecting a clean end-of-stream.
        let mut filled = 0;
        while filled < header.len() {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(total);
                }
                return Err(truncated("frame header").into());
            }
            filled += n;
        }

        let kind = StreamKind::from_header(header[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected stream id {}", header[0]),
            )
        })?;
        let mut remaining = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        while remaining > 0 {
            let want = remaining.min(buffer.len());
            let n = reader.read(&mut buffer[..want]).await?;
            if n == 0 {
                return Err(truncated("frame payload").into());
            }
            sink(kind, &buffer[..n]);
            remaining -= n;
            total += n as u64;
        }
    }
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("multiplexed stream ended inside a {what}"),
    )
}

/// Frames a payload the way the daemon does. Test helper for stream
/// implementations; the executor itself only ever demultiplexes.
pub fn mux_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
    let id = match kind {
        StreamKind::Stdin => 0u8,
        StreamKind::Stdout => 1,
        StreamKind::Stderr => 2,
    };
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.push(id);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
