//! LZ4 compression for stored blocks
//!
//! Blocks on disk carry a one-byte header saying whether the payload
//! is raw or LZ4 compressed. Only compresses if the result is smaller.

use crate::error::{Error, Result};
use bytes::Bytes;

const TAG_RAW: u8 = 0;
const TAG_LZ4: u8 = 1;

/// Compress data using LZ4
///
/// Returns None if compression doesn't reduce size
pub fn compress(data: &[u8], threshold: usize) -> Option<Vec<u8>> {
    if data.len() < threshold {
        return None;
    }

    let compressed = lz4_flex::compress_prepend_size(data);
    if compressed.len() < data.len() {
        Some(compressed)
    } else {
        None
    }
}

/// Decompress LZ4 data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::storage("decompression failed", e))
}

/// Frame a block for storage, compressing when enabled and worthwhile
pub fn encode_block(data: &[u8], enabled: bool, threshold: usize) -> Vec<u8> {
    let compressed = if enabled { compress(data, threshold) } else { None };

    let (tag, payload) = match &compressed {
        Some(c) => (TAG_LZ4, c.as_slice()),
        None => (TAG_RAW, data),
    };

    let mut framed = Vec::with_capacity(payload.len() + 1);
    framed.push(tag);
    framed.extend_from_slice(payload);
    framed
}

/// Recover block bytes from their stored frame
pub fn decode_block(framed: &[u8]) -> Result<Bytes> {
    match framed.split_first() {
        Some((&TAG_RAW, payload)) => Ok(Bytes::copy_from_slice(payload)),
        Some((&TAG_LZ4, payload)) => Ok(Bytes::from(decompress(payload)?)),
        Some((tag, _)) => Err(Error::StorageFault(format!("unknown block frame tag {}", tag))),
        None => Err(Error::StorageFault("empty block frame".to_string())),
    }
}
