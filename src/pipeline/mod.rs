//! Ingest and retrieval pipelines
//!
//! Ingest streams a source through the chunker into the block store and
//! records the result in the file index; retrieval walks a record's blocks
//! back into the original bytes.

mod ingest;
mod progress;
mod retrieve;

pub use ingest::{IngestOutcome, Ingestor};
pub use progress::{CancelHandle, NoProgress, ProgressObserver};
pub use retrieve::Retriever;

pub(crate) use progress::MonotonicProgress;
