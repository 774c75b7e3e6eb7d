//! Upload orchestration
//!
//! An [`UploadQueue`] holds files selected for upload and ingests them one
//! after another, folding per-file progress into one batch-wide fraction.
//! The first failure stops the batch; files stored before it stay stored.

mod source;

pub use source::{BytesSource, PathSource, SourceReader, UploadSource};

use crate::error::{Error, Result};
use crate::index::{FileIndex, FileRecord};
use crate::pipeline::{CancelHandle, Ingestor, ProgressObserver};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Batch lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchStatus {
    /// Nothing has run yet
    #[default]
    Idle,
    /// A batch is running
    Uploading,
    /// The last batch stored every file
    Success,
    /// The last batch stopped on a failure
    Error,
}

/// Outcome of a successful batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Records created by this batch, in queue order
    pub records: Vec<FileRecord>,
    /// Every stored file after the batch
    pub library: Vec<FileRecord>,
}

/// Files waiting to be uploaded
#[derive(Default)]
pub struct UploadQueue {
    state: Mutex<QueueState>,
    cancel: CancelHandle,
}

#[derive(Default)]
struct QueueState {
    sources: Vec<Arc<dyn UploadSource>>,
    status: BatchStatus,
    progress: f64,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source to the queue
    pub fn enqueue<S: UploadSource + 'static>(&self, source: S) {
        self.state.lock().sources.push(Arc::new(source));
    }

    /// Append a local file to the queue
    pub fn enqueue_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.enqueue(PathSource::new(path)?);
        Ok(())
    }

    /// Drop every queued source and reset progress
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.sources.clear();
        state.progress = 0.0;
        if state.status != BatchStatus::Uploading {
            state.status = BatchStatus::Idle;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().sources.is_empty()
    }

    /// Names of the queued sources, in order
    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .sources
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn status(&self) -> BatchStatus {
        self.state.lock().status
    }

    /// Batch-wide progress in `[0, 1]`
    pub fn progress(&self) -> f64 {
        self.state.lock().progress
    }

    /// Handle that aborts the running batch
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Upload every queued source in order
    ///
    /// On success the queue is emptied and the report carries the refreshed
    /// library listing. On failure the queue is kept so the batch can be
    /// retried, and the failing file's error is returned.
    ///
    /// A cancellation requested before `run` aborts that run. The cancel
    /// handle is cleared when the run ends, including when its future is
    /// dropped, which also leaves the status at `Error`.
    pub async fn run(
        &self,
        ingestor: &Ingestor,
        index: &dyn FileIndex,
        observer: &dyn ProgressObserver,
    ) -> Result<BatchReport> {
        let sources = {
            let mut state = self.state.lock();
            if state.status == BatchStatus::Uploading {
                return Err(Error::BatchInProgress);
            }
            state.status = BatchStatus::Uploading;
            state.progress = 0.0;
            state.sources.clone()
        };
        let _guard = RunGuard { queue: self };

        info!("Uploading batch of {} files", sources.len());

        let result = match self.upload_all(&sources, ingestor, observer).await {
            Ok(records) => index
                .list()
                .await
                .map(|library| BatchReport { records, library }),
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => {
                {
                    let mut state = self.state.lock();
                    let done = sources.len().min(state.sources.len());
                    state.sources.drain(..done);
                    state.status = BatchStatus::Success;
                    state.progress = 1.0;
                }
                observer.on_progress(1.0);

                info!("Batch complete: {} files stored", report.records.len());
                Ok(report)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.status = BatchStatus::Error;
                state.progress = 0.0;
                Err(e)
            }
        }
    }

    async fn upload_all(
        &self,
        sources: &[Arc<dyn UploadSource>],
        ingestor: &Ingestor,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<FileRecord>> {
        let mut records = Vec::with_capacity(sources.len());

        for (completed, source) in sources.iter().enumerate() {
            self.cancel.check()?;

            let aggregate = BatchProgress {
                queue: self,
                observer,
                completed,
                total: sources.len(),
            };

            let result = match source.open().await {
                Ok(reader) => {
                    ingestor
                        .ingest(source.name(), reader, source.size_hint(), &aggregate, &self.cancel)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => records.push(outcome.record),
                Err(e) => {
                    warn!(
                        "Upload of {} failed ({} of {}): {}",
                        source.name(),
                        completed + 1,
                        sources.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(records)
    }

    /// Raise batch progress to `overall`, returning the value now held
    fn advance(&self, overall: f64) -> f64 {
        let mut state = self.state.lock();
        state.progress = state.progress.max(overall.clamp(0.0, 1.0));
        state.progress
    }
}

/// Ends a run however its future finishes
struct RunGuard<'a> {
    queue: &'a UploadQueue,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            if state.status == BatchStatus::Uploading {
                warn!("Upload batch dropped before completion");
                state.status = BatchStatus::Error;
                state.progress = 0.0;
            }
        }
        self.queue.cancel.reset();
    }
}

/// Maps one file's progress onto the whole batch
struct BatchProgress<'a> {
    queue: &'a UploadQueue,
    observer: &'a dyn ProgressObserver,
    completed: usize,
    total: usize,
}

impl ProgressObserver for BatchProgress<'_> {
    fn on_progress(&self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let overall = (self.completed as f64 + fraction) / self.total as f64;
        let held = self.queue.advance(overall);
        self.observer.on_progress(held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::index::MemoryFileIndex;
    use crate::pipeline::NoProgress;
    use crate::store::MemoryBlockStore;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    fn setup() -> (Arc<MemoryFileIndex>, Ingestor) {
        let index = Arc::new(MemoryFileIndex::default());
        let ingestor = Ingestor::new(
            Arc::new(MemoryBlockStore::new()),
            index.clone(),
            Chunker::new(64).unwrap(),
        );
        (index, ingestor)
    }

    /// Yields some bytes, then fails
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection dropped",
                )));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![0x42u8; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl UploadSource for FailingSource {
        fn name(&self) -> &str {
            "broken.bin"
        }

        fn size_hint(&self) -> Option<u64> {
            Some(1000)
        }

        async fn open(&self) -> Result<SourceReader> {
            Ok(Box::new(FailingReader { remaining: 200 }))
        }
    }

    /// Records whether it was ever opened
    struct TrackedSource {
        inner: BytesSource,
        opened: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UploadSource for TrackedSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn size_hint(&self) -> Option<u64> {
            self.inner.size_hint()
        }

        async fn open(&self) -> Result<SourceReader> {
            self.opened.store(true, Ordering::SeqCst);
            self.inner.open().await
        }
    }

    /// Reader that never produces data
    struct StalledReader;

    impl AsyncRead for StalledReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    struct StalledSource;

    #[async_trait]
    impl UploadSource for StalledSource {
        fn name(&self) -> &str {
            "stalled.bin"
        }

        fn size_hint(&self) -> Option<u64> {
            None
        }

        async fn open(&self) -> Result<SourceReader> {
            Ok(Box::new(StalledReader))
        }
    }

    /// Index whose every call fails
    struct UnlistableIndex;

    #[async_trait]
    impl FileIndex for UnlistableIndex {
        async fn create(&self, _: crate::index::NewFileRecord) -> Result<FileRecord> {
            Err(Error::StorageFault("index offline".to_string()))
        }
        async fn list(&self) -> Result<Vec<FileRecord>> {
            Err(Error::StorageFault("index offline".to_string()))
        }
        async fn get(&self, id: u64) -> Result<FileRecord> {
            Err(Error::NotFound(format!("file {}", id)))
        }
        async fn len(&self) -> Result<usize> {
            Err(Error::StorageFault("index offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_batch_success() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        assert_eq!(queue.status(), BatchStatus::Idle);

        queue.enqueue(BytesSource::new("one.txt", vec![1u8; 100]));
        queue.enqueue(BytesSource::new("two.txt", vec![2u8; 300]));
        queue.enqueue(BytesSource::new("empty.txt", Vec::new()));
        assert_eq!(queue.names(), vec!["one.txt", "two.txt", "empty.txt"]);

        let seen = Mutex::new(Vec::new());
        let observer = |f: f64| seen.lock().push(f);
        let report = queue.run(&ingestor, index.as_ref(), &observer).await.unwrap();

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.library, report.records);
        assert_eq!(queue.status(), BatchStatus::Success);
        assert_eq!(queue.progress(), 1.0);
        assert!(queue.is_empty());

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(*seen.last().unwrap(), 1.0);
        // First file finishing is a third of the batch
        assert!(seen.iter().any(|f| (f - 1.0 / 3.0).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        let third_opened = Arc::new(AtomicBool::new(false));

        queue.enqueue(BytesSource::new("first.txt", vec![7u8; 150]));
        queue.enqueue(FailingSource);
        queue.enqueue(TrackedSource {
            inner: BytesSource::new("third.txt", vec![9u8; 10]),
            opened: third_opened.clone(),
        });

        let result = queue.run(&ingestor, index.as_ref(), &NoProgress).await;

        assert!(matches!(result, Err(Error::SourceRead(_))));
        assert_eq!(queue.status(), BatchStatus::Error);
        assert_eq!(queue.progress(), 0.0);
        assert_eq!(queue.len(), 3);
        assert!(!third_opened.load(Ordering::SeqCst));

        let listed = index.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_name, "first.txt");
    }

    #[tokio::test]
    async fn test_cancelled_batch() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        queue.enqueue(BytesSource::new("a", vec![1u8; 500]));
        queue.enqueue(BytesSource::new("b", vec![2u8; 500]));

        let cancel = queue.cancel_handle();
        let observer = move |_f: f64| cancel.cancel();
        let result = queue.run(&ingestor, index.as_ref(), &observer).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(queue.status(), BatchStatus::Error);
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(!queue.cancel_handle().is_cancelled());

        // The kept queue can be retried once the handle is clear
        queue.run(&ingestor, index.as_ref(), &NoProgress).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_run_is_honoured() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        queue.enqueue(BytesSource::new("early", vec![1u8; 100]));

        queue.cancel_handle().cancel();
        let result = queue.run(&ingestor, index.as_ref(), &NoProgress).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(!queue.cancel_handle().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_batch_can_be_retried() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        queue.enqueue(StalledSource);

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            queue.run(&ingestor, index.as_ref(), &NoProgress),
        )
        .await;

        assert!(timed_out.is_err());
        assert_eq!(queue.status(), BatchStatus::Error);
        assert_eq!(queue.progress(), 0.0);

        queue.clear();
        queue.enqueue(BytesSource::new("retry.txt", vec![4u8; 80]));
        let report = queue.run(&ingestor, index.as_ref(), &NoProgress).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(queue.status(), BatchStatus::Success);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_batch() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();
        queue.enqueue(BytesSource::new("stored.txt", vec![6u8; 20]));

        let result = queue.run(&ingestor, &UnlistableIndex, &NoProgress).await;

        assert!(matches!(result, Err(Error::StorageFault(_))));
        assert_eq!(queue.status(), BatchStatus::Error);
        assert_eq!(queue.progress(), 0.0);
        assert_eq!(queue.len(), 1);
        // The file itself was stored before the listing failed
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let (index, ingestor) = setup();
        let queue = UploadQueue::new();

        let report = queue.run(&ingestor, index.as_ref(), &NoProgress).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(queue.status(), BatchStatus::Success);
        assert_eq!(queue.progress(), 1.0);
    }

    #[test]
    fn test_clear() {
        let queue = UploadQueue::new();
        queue.enqueue(BytesSource::new("a", vec![1u8]));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.status(), BatchStatus::Idle);
    }
}
