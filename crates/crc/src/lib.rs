//! CRC-32 digest computation over byte streams.
//!
//! Every chunk a client sends carries a CRC-32 of its own bytes; the server
//! recomputes the digest while appending and compares at end of stream.
//! Digests are serialized as lowercase 8-character hex strings.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Buffer size used when digesting a whole stream.
pub const CRC_BUFFER_SIZE: usize = 8192;

/// A finalized digest together with the number of bytes it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcResult {
    /// Lowercase hex digest, always 8 characters.
    pub hex: String,
    /// Total bytes fed into the hasher.
    pub bytes_read: u64,
}

/// Incremental CRC-32 over a byte sequence.
///
/// Feed slices with [`update`](Self::update) in stream order, then call
/// [`finalize`](Self::finalize). The digest is a pure function of the byte
/// content: same bytes, same digest, on every platform.
#[derive(Debug, Default)]
pub struct CrcAccumulator {
    hasher: crc32fast::Hasher,
    bytes_read: u64,
}

impl CrcAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next bytes of the stream into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_read += data.len() as u64;
    }

    /// Consumes the accumulator and returns the final digest.
    pub fn finalize(self) -> CrcResult {
        CrcResult {
            hex: format!("{:08x}", self.hasher.finalize()),
            bytes_read: self.bytes_read,
        }
    }
}

/// Fully consumes `reader` and returns the digest of everything it yielded.
///
/// Reads in [`CRC_BUFFER_SIZE`] bursts. No side effects beyond the reads.
pub async fn buffered_crc<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<CrcResult> {
    let mut acc = CrcAccumulator::new();
    let mut buf = [0u8; CRC_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        acc.update(&buf[..n]);
    }
    Ok(acc.finalize())
}

/// Compares two hex digests, ignoring case.
///
/// Clients are not required to send lowercase.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
