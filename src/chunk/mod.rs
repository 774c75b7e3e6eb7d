//! Block management module
//!
//! Handles splitting input streams into fixed-size blocks, content
//! fingerprinting, and on-disk block framing.

mod chunker;
mod compression;
pub mod hasher;

pub use chunker::{AsyncBlocks, Block, Blocks, Chunker};
pub use compression::{compress, decode_block, decompress, encode_block};
pub use hasher::{hash, Fingerprint, FINGERPRINT_LEN};
