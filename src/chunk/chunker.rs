//! Fixed-size block splitting
//!
//! Blocks are produced lazily from a reader, one at a time, so memory
//! stays bounded by the block size regardless of the input length.
//! Every block except the last is exactly `block_size` bytes.

use crate::chunk::hasher::{self, Fingerprint};
use crate::config::BlockConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::Stream;
use std::io::{ErrorKind, Read};
use tokio::io::{AsyncRead, AsyncReadExt};

/// An immutable block of content and its fingerprint
#[derive(Debug, Clone)]
pub struct Block {
    /// Content-based ID
    pub fingerprint: Fingerprint,
    /// Offset in the original stream
    pub offset: u64,
    /// Block contents
    pub data: Bytes,
}

impl Block {
    /// Create a new block, fingerprinting its data
    pub fn new(data: Bytes, offset: u64) -> Self {
        Block {
            fingerprint: hasher::hash(&data),
            offset,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits byte streams into fixed-size blocks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    block_size: usize,
}

impl Chunker {
    /// Create a chunker with a specific block size
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidConfig(
                "Block size must be greater than 0".to_string(),
            ));
        }
        Ok(Chunker { block_size })
    }

    /// Create a chunker from the block configuration
    pub fn from_config(config: &BlockConfig) -> Result<Self> {
        Self::new(config.block_size)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Lazily split a blocking reader
    pub fn split<R: Read>(&self, reader: R) -> Blocks<R> {
        Blocks {
            reader,
            block_size: self.block_size,
            offset: 0,
            done: false,
        }
    }

    /// Lazily split an async reader
    pub fn split_async<R: AsyncRead + Unpin>(&self, reader: R) -> AsyncBlocks<R> {
        AsyncBlocks {
            reader,
            block_size: self.block_size,
            offset: 0,
            done: false,
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Chunker {
            block_size: crate::config::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Iterator over the blocks of a blocking reader
pub struct Blocks<R> {
    reader: R,
    block_size: usize,
    offset: u64,
    done: bool,
}

impl<R: Read> Blocks<R> {
    /// Bytes consumed from the source so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.block_size];
        let mut total_read = 0;

        // Read until buffer is full or EOF
        while total_read < self.block_size {
            match self.reader.read(&mut buffer[total_read..]) {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buffer.truncate(total_read);
        Ok(buffer)
    }
}

impl<R: Read> Iterator for Blocks<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.fill() {
            Ok(data) if data.is_empty() => {
                self.done = true;
                None
            }
            Ok(data) => {
                let block = Block::new(Bytes::from(data), self.offset);
                self.offset += block.len() as u64;
                Some(Ok(block))
            }
            Err(e) => {
                self.done = true;
                Some(Err(Error::SourceRead(e)))
            }
        }
    }
}

/// Pull-based block sequence over an async reader
pub struct AsyncBlocks<R> {
    reader: R,
    block_size: usize,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncBlocks<R> {
    /// Bytes consumed from the source so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Read the next block, or `None` once the source is exhausted
    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.block_size];
        let mut total_read = 0;

        while total_read < self.block_size {
            match self.reader.read(&mut buffer[total_read..]).await {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Err(Error::SourceRead(e));
                }
            }
        }

        if total_read == 0 {
            self.done = true;
            return Ok(None);
        }

        buffer.truncate(total_read);
        let block = Block::new(Bytes::from(buffer), self.offset);
        self.offset += total_read as u64;
        Ok(Some(block))
    }

    /// Adapt into a `Stream` of blocks
    pub fn into_stream(self) -> impl Stream<Item = Result<Block>> {
        futures::stream::try_unfold(self, |mut blocks| async move {
            Ok(blocks.next_block().await?.map(|block| (block, blocks)))
        })
    }
}
