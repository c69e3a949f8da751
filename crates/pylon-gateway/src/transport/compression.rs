//! zlib-stream transport compression
//!
//! With `compress=zlib-stream` the remote deflates the whole connection as
//! one zlib stream and sync-flushes after every message. A message may span
//! several binary frames; it is complete once the buffered bytes end with
//! the sync-flush marker. The inflate context lives as long as the
//! connection and must not be shared across reconnects.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{GatewayError, GatewayResult};

/// Trailer of a sync-flushed deflate block
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const INFLATE_CHUNK: usize = 32 * 1024;

pub struct ZlibInflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl ZlibInflater {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary frame
    ///
    /// Returns the decoded message once the frame completes one, `None`
    /// while more frames are needed.
    pub fn push(&mut self, frame: &[u8]) -> GatewayResult<Option<String>> {
        self.buffer.extend_from_slice(frame);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.buffer.len() * 4);
        let mut input: &[u8] = &self.buffer;
        loop {
            out.reserve(INFLATE_CHUNK);
            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();

            let status = self
                .decompress
                .decompress_vec(input, &mut out, FlushDecompress::Sync)
                .map_err(|e| GatewayError::protocol(format!("zlib-stream: {e}")))?;

            let consumed = (self.decompress.total_in() - in_before) as usize;
            let produced = self.decompress.total_out() - out_before;
            input = &input[consumed..];

            match status {
                Status::StreamEnd => break,
                _ if input.is_empty() && out.len() < out.capacity() => break,
                Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(GatewayError::protocol("zlib-stream stalled"));
                }
                _ => {}
            }
        }
        self.buffer.clear();

        String::from_utf8(out)
            .map(Some)
            .map_err(|_| GatewayError::protocol("inflated message is not UTF-8"))
    }

    /// Bytes waiting for the rest of a message
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZlibInflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibInflater")
            .field("total_in", &self.decompress.total_in())
            .field("pending", &self.buffer.len())
            .finish()
    }
}
