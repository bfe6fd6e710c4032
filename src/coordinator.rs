//! Planning, fan-out and fan-in of one segmented download.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DownloadOptions;
use crate::error::{DownloadError, DownloadResult, SegmentFailure, TransferError};
use crate::fetcher::{self, ChunkSink, RangeFetcher};
use crate::hashing;
use crate::plan::{self, Segment};
use crate::probe;
use crate::progress::ProgressState;
use crate::resource::Resource;
use crate::state::{JournalCheckpoint, ResumeJournal};
use crate::throttle::Throttle;
use crate::writer::{BoundedSink, SegmentWriter, SinkStatus};

/// Minimum time between two journal saves while segments are running.
const JOURNAL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadPhase {
    Idle,
    Planning,
    Fetching,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub resource: Resource,
    pub destination: PathBuf,
}

/// Outcome of one segment worker.
#[derive(Debug)]
pub struct SegmentResult {
    pub index: usize,
    pub bytes_written: u64,
    pub error: Option<TransferError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub url: String,
    pub destination: PathBuf,
    pub total_size: u64,
    /// Bytes kept from an earlier run.
    pub resumed_from: u64,
    /// Bytes fetched by this run.
    pub bytes_transferred: u64,
    pub segments: usize,
    pub elapsed_secs: f64,
    pub bytes_per_second: f64,
}

impl DownloadSummary {
    fn new(
        request: &DownloadRequest,
        total_size: u64,
        resumed_from: u64,
        bytes_transferred: u64,
        segments: usize,
        elapsed: Duration,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let bytes_per_second = if elapsed_secs > 0.0 {
            bytes_transferred as f64 / elapsed_secs
        } else {
            0.0
        };
        Self {
            url: request.resource.to_string(),
            destination: request.destination.clone(),
            total_size,
            resumed_from,
            bytes_transferred,
            segments,
            elapsed_secs,
            bytes_per_second,
        }
    }
}

/// Runs segmented downloads.
///
/// The coordinator owns the destination handle for the duration of a run:
/// it is opened once before the workers start and closed once after all of
/// them reported. Cancelling [`DownloadCoordinator::cancellation_token`]
/// stops the current and every later run.
pub struct DownloadCoordinator {
    options: DownloadOptions,
    client: Option<reqwest::Client>,
    progress: ProgressState,
    cancel: CancellationToken,
    phase: watch::Sender<DownloadPhase>,
}

impl DownloadCoordinator {
    pub fn new(options: DownloadOptions) -> Self {
        let (phase, _) = watch::channel(DownloadPhase::Idle);
        Self {
            options,
            client: None,
            progress: ProgressState::new(),
            cancel: CancellationToken::new(),
            phase,
        }
    }

    /// Shares an existing HTTP connection pool instead of building one per run.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn progress(&self) -> ProgressState {
        self.progress.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> DownloadPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: DownloadPhase) {
        tracing::debug!(?phase, "download phase");
        self.phase.send_replace(phase);
    }

    pub async fn run(&self, request: &DownloadRequest) -> DownloadResult<DownloadSummary> {
        self.set_phase(DownloadPhase::Planning);
        let fetcher = match self.options.validate().and_then(|_| {
            fetcher::for_resource(
                &request.resource,
                self.client.clone(),
                self.options.connect_timeout,
            )
        }) {
            Ok(fetcher) => fetcher,
            Err(e) => {
                self.set_phase(DownloadPhase::Failed);
                return Err(e);
            }
        };
        self.run_with_fetcher(fetcher, request).await
    }

    /// Same as [`DownloadCoordinator::run`] with a caller-supplied transport.
    pub async fn run_with_fetcher(
        &self,
        fetcher: Arc<dyn RangeFetcher>,
        request: &DownloadRequest,
    ) -> DownloadResult<DownloadSummary> {
        let started = Instant::now();
        self.set_phase(DownloadPhase::Planning);

        let result = self.execute(fetcher, request, started).await;
        match &result {
            Ok(summary) => {
                tracing::info!(
                    bytes = summary.bytes_transferred,
                    elapsed_secs = summary.elapsed_secs,
                    bytes_per_second = summary.bytes_per_second,
                    "download completed"
                );
                self.set_phase(DownloadPhase::Completed);
            }
            Err(e) => {
                tracing::error!(error = %e, "download failed");
                self.set_phase(DownloadPhase::Failed);
            }
        }
        result
    }

    async fn execute(
        &self,
        fetcher: Arc<dyn RangeFetcher>,
        request: &DownloadRequest,
        started: Instant,
    ) -> DownloadResult<DownloadSummary> {
        self.options.validate()?;
        let destination = request.destination.as_path();

        let total_size = fetcher.content_length().await?;
        let resume_offset = probe::probe(destination, self.options.resume).await?;
        let segments = plan::plan(
            total_size,
            resume_offset,
            self.options.segments,
            fetcher.supports_random_access(),
        )?;

        tracing::info!(
            url = %request.resource,
            total_size,
            resume_offset,
            segments = segments.len(),
            "planned download"
        );
        self.progress.start(total_size, resume_offset.min(total_size));

        let journal_path = ResumeJournal::path_for(destination);

        if segments.is_empty() {
            tracing::info!(path = %destination.display(), "destination already complete");
            ResumeJournal::remove(&journal_path)
                .await
                .map_err(|e| DownloadError::local_io("cannot remove", &journal_path, e))?;
            self.verify(request).await?;
            return Ok(DownloadSummary::new(
                request,
                total_size,
                resume_offset,
                0,
                0,
                started.elapsed(),
            ));
        }

        // A journal left by an earlier run must not outlive the truncation below.
        let checkpoint = Arc::new(JournalCheckpoint::new(
            ResumeJournal::new(request.resource.url().as_str(), total_size, &segments),
            journal_path.clone(),
            JOURNAL_INTERVAL,
        ));
        checkpoint
            .save()
            .await
            .map_err(|e| DownloadError::local_io("cannot write", &journal_path, e))?;

        let writer = Arc::new(SegmentWriter::open(destination, total_size, resume_offset > 0).await?);

        self.set_phase(DownloadPhase::Fetching);
        let results = self
            .fan_out(fetcher, writer.clone(), checkpoint.clone(), &segments)
            .await;
        writer.close().await?;
        drop(writer);

        let failures: Vec<SegmentFailure> = results
            .into_iter()
            .filter_map(|r| {
                r.error.map(|error| SegmentFailure {
                    index: r.index,
                    bytes_written: r.bytes_written,
                    error,
                })
            })
            .collect();

        if !failures.is_empty() {
            checkpoint
                .save()
                .await
                .map_err(|e| DownloadError::local_io("cannot write", &journal_path, e))?;
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            return Err(DownloadError::SegmentsFailed(failures));
        }

        ResumeJournal::remove(&journal_path)
            .await
            .map_err(|e| DownloadError::local_io("cannot remove", &journal_path, e))?;
        self.verify(request).await?;

        Ok(DownloadSummary::new(
            request,
            total_size,
            resume_offset,
            self.progress.transferred(),
            segments.len(),
            started.elapsed(),
        ))
    }

    /// Spawns one worker per segment and waits for all of them.
    async fn fan_out(
        &self,
        fetcher: Arc<dyn RangeFetcher>,
        writer: Arc<SegmentWriter>,
        checkpoint: Arc<JournalCheckpoint>,
        segments: &[Segment],
    ) -> Vec<SegmentResult> {
        // Failure-triggered cancellation stays local to this run.
        let run_token = self.cancel.child_token();
        let throttle = self.options.rate_limit.map(Throttle::per_second);
        if let Some(throttle) = &throttle {
            tracing::debug!(bytes_per_second = throttle.bytes_per_second(), "rate limit enabled");
        }

        let mut handles = Vec::with_capacity(segments.len());
        for segment in segments.iter().copied() {
            let worker = SegmentWorker {
                fetcher: fetcher.clone(),
                writer: writer.clone(),
                checkpoint: checkpoint.clone(),
                progress: self.progress.clone(),
                throttle: throttle.clone(),
                token: run_token.clone(),
                options: self.options.clone(),
            };
            let span = tracing::info_span!(
                "segment",
                index = segment.index,
                start = segment.start,
                end = segment.end
            );
            handles.push((segment.index, tokio::spawn(worker.run(segment).instrument(span))));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => SegmentResult {
                    index,
                    bytes_written: 0,
                    error: Some(TransferError::Aborted(e.to_string())),
                },
            };
            results.push(result);
        }
        results
    }

    async fn verify(&self, request: &DownloadRequest) -> DownloadResult<()> {
        if let Some(expected) = &self.options.expected_sha256 {
            tracing::info!(path = %request.destination.display(), "verifying SHA-256");
            hashing::verify_sha256(&request.destination, expected).await?;
        }
        Ok(())
    }
}

struct SegmentWorker {
    fetcher: Arc<dyn RangeFetcher>,
    writer: Arc<SegmentWriter>,
    checkpoint: Arc<JournalCheckpoint>,
    progress: ProgressState,
    throttle: Option<Throttle>,
    token: CancellationToken,
    options: DownloadOptions,
}

impl SegmentWorker {
    async fn run(self, segment: Segment) -> SegmentResult {
        let mut written = 0u64;
        let mut attempt = 0u32;

        let error = loop {
            let Some(remaining) = segment.remainder(written) else {
                break None;
            };
            attempt += 1;

            let mut sink = SegmentSink {
                inner: BoundedSink::new(self.writer.clone(), &remaining),
                index: segment.index,
                written_before: written,
                checkpoint: self.checkpoint.clone(),
                progress: self.progress.clone(),
                throttle: self.throttle.clone(),
            };
            let outcome = self.attempt(&remaining, &mut sink).await;
            written += sink.inner.accepted();

            match outcome {
                Ok(()) => break None,
                Err(e) if e.is_retryable() && attempt <= self.options.retries => {
                    let delay = self.options.backoff_for(attempt);
                    tracing::warn!(attempt, error = %e, ?delay, written, "segment attempt failed, retrying");
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => break Some(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => break Some(e),
            }
        };

        if let Err(e) = self.checkpoint.commit(segment.index, written).await {
            tracing::warn!(path = %self.checkpoint.path().display(), error = %e, "cannot update resume journal");
        }

        match &error {
            None => tracing::debug!(written, "segment done"),
            Some(TransferError::Cancelled) => tracing::debug!(written, "segment cancelled"),
            Some(e) => {
                tracing::warn!(written, error = %e, "segment failed");
                if self.options.cancel_on_failure {
                    self.token.cancel();
                }
            }
        }

        SegmentResult {
            index: segment.index,
            bytes_written: written,
            error,
        }
    }

    async fn attempt(&self, segment: &Segment, sink: &mut SegmentSink) -> Result<(), TransferError> {
        let transfer = async {
            let fetch = self.fetcher.fetch(segment, &mut *sink);
            match self.options.segment_timeout {
                Some(limit) => match tokio::time::timeout(limit, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(TransferError::Timeout(limit)),
                },
                None => fetch.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(TransferError::Cancelled),
            result = transfer => {
                result?;
            }
        }

        if sink.inner.remaining() > 0 {
            return Err(TransferError::ShortRead {
                expected: segment.len(),
                actual: sink.inner.accepted(),
            });
        }
        Ok(())
    }
}

/// The sink a worker hands to its fetcher for one attempt.
struct SegmentSink {
    inner: BoundedSink,
    index: usize,
    /// Bytes of the segment written by earlier attempts.
    written_before: u64,
    checkpoint: Arc<JournalCheckpoint>,
    progress: ProgressState,
    throttle: Option<Throttle>,
}

#[async_trait]
impl ChunkSink for SegmentSink {
    async fn accept(&mut self, chunk: &[u8]) -> Result<(usize, SinkStatus), TransferError> {
        if let Some(throttle) = &self.throttle {
            let wanted = (chunk.len() as u64).min(self.inner.remaining());
            throttle.acquire(wanted as usize).await?;
        }
        let (taken, status) = self.inner.write(chunk).await?;
        self.progress.add(taken as u64);

        if taken > 0 {
            let written = self.written_before + self.inner.accepted();
            if let Err(e) = self.checkpoint.record(self.index, written).await {
                tracing::warn!(path = %self.checkpoint.path().display(), error = %e, "cannot update resume journal");
            }
        }
        Ok((taken, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::deliver;
    use crate::resource::Credentials;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Serves `data` from memory, streaming from the segment start to EOF.
    #[derive(Default)]
    struct MemoryFetcher {
        data: Vec<u8>,
        sequential: bool,
        failing: HashSet<usize>,
        stalling: HashSet<usize>,
        /// Segments whose first attempt stops halfway.
        flaky: Mutex<HashSet<usize>>,
        fetches: AtomicUsize,
    }

    impl MemoryFetcher {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RangeFetcher for MemoryFetcher {
        async fn content_length(&self) -> DownloadResult<u64> {
            if self.data.is_empty() {
                return Err(DownloadError::SizeUnknown {
                    url: "memory".to_string(),
                    reason: "empty".to_string(),
                });
            }
            Ok(self.data.len() as u64)
        }

        async fn fetch(&self, segment: &Segment, sink: &mut dyn ChunkSink) -> Result<u64, TransferError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&segment.index) {
                return Err(TransferError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
            if self.stalling.contains(&segment.index) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }

            let body = &self.data[segment.start as usize..];
            let first_attempt = self.flaky.lock().unwrap().remove(&segment.index);
            let body = if first_attempt {
                &body[..(segment.len() / 2) as usize]
            } else {
                body
            };
            let (n, _) = deliver(sink, body).await?;
            Ok(n)
        }

        fn supports_random_access(&self) -> bool {
            !self.sequential
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn request(dir: &std::path::Path) -> DownloadRequest {
        DownloadRequest {
            resource: Resource::parse("http://example.com/data.bin", Credentials::default()).unwrap(),
            destination: dir.join("data.bin"),
        }
    }

    fn options(segments: usize) -> DownloadOptions {
        DownloadOptions {
            segments,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_four_segments_complete() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let data = payload(1000);
        let fetcher = Arc::new(MemoryFetcher::new(data.clone()));
        let coordinator = DownloadCoordinator::new(options(4));
        let phases = coordinator.subscribe();

        let summary = coordinator
            .run_with_fetcher(fetcher.clone(), &request(dir.path()))
            .await?;

        assert_eq!(summary.total_size, 1000);
        assert_eq!(summary.bytes_transferred, 1000);
        assert_eq!(summary.segments, 4);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(std::fs::read(dir.path().join("data.bin"))?, data);
        assert_eq!(*phases.borrow(), DownloadPhase::Completed);
        assert!(!ResumeJournal::path_for(&dir.path().join("data.bin")).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_size_creates_no_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let coordinator = DownloadCoordinator::new(options(4));

        let err = coordinator
            .run_with_fetcher(Arc::new(MemoryFetcher::new(vec![])), &request(dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::SizeUnknown { .. }));
        assert!(!dir.path().join("data.bin").exists());
        assert_eq!(coordinator.phase(), DownloadPhase::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_segment_keeps_siblings_and_resumes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.bin");
        let data = payload(900);

        let broken = MemoryFetcher {
            failing: HashSet::from([1]),
            ..MemoryFetcher::new(data.clone())
        };
        let err = DownloadCoordinator::new(options(3))
            .run_with_fetcher(Arc::new(broken), &request(dir.path()))
            .await
            .unwrap_err();

        match err {
            DownloadError::SegmentsFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        let on_disk = std::fs::read(&path)?;
        assert_eq!(on_disk.len(), 900);
        assert_eq!(&on_disk[..300], &data[..300]);
        assert_eq!(&on_disk[300..600], &[0u8; 300][..]);
        assert_eq!(&on_disk[600..], &data[600..]);

        // Only the prefix before the gap is trusted on resume.
        assert_eq!(probe::probe(&path, true).await?, 300);

        let healthy = Arc::new(MemoryFetcher::new(data.clone()));
        let summary = DownloadCoordinator::new(DownloadOptions {
            resume: true,
            ..options(3)
        })
        .run_with_fetcher(healthy, &request(dir.path()))
        .await?;

        assert_eq!(summary.resumed_from, 300);
        assert_eq!(summary.bytes_transferred, 600);
        assert_eq!(std::fs::read(&path)?, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_file_is_not_downloaded_again() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let data = payload(500);
        std::fs::write(dir.path().join("data.bin"), &data)?;

        let fetcher = Arc::new(MemoryFetcher::new(data.clone()));
        let summary = DownloadCoordinator::new(DownloadOptions {
            resume: true,
            ..options(4)
        })
        .run_with_fetcher(fetcher.clone(), &request(dir.path()))
        .await?;

        assert_eq!(summary.bytes_transferred, 0);
        assert_eq!(summary.segments, 0);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_sequential_transport_resumes_with_one_segment() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let data = payload(1000);
        std::fs::write(dir.path().join("data.bin"), &data[..400])?;

        let fetcher = Arc::new(MemoryFetcher {
            sequential: true,
            ..MemoryFetcher::new(data.clone())
        });
        let summary = DownloadCoordinator::new(DownloadOptions {
            resume: true,
            ..options(3)
        })
        .run_with_fetcher(fetcher.clone(), &request(dir.path()))
        .await?;

        assert_eq!(summary.segments, 1);
        assert_eq!(summary.bytes_transferred, 600);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(dir.path().join("data.bin"))?, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_continues_from_written_bytes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let data = payload(1000);
        let fetcher = Arc::new(MemoryFetcher {
            flaky: Mutex::new(HashSet::from([0, 2])),
            ..MemoryFetcher::new(data.clone())
        });

        let coordinator = DownloadCoordinator::new(DownloadOptions {
            retries: 2,
            ..options(4)
        });
        let summary = coordinator
            .run_with_fetcher(fetcher.clone(), &request(dir.path()))
            .await?;

        // Retried segments do not count their first half twice.
        assert_eq!(summary.bytes_transferred, 1000);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 6);
        assert_eq!(std::fs::read(dir.path().join("data.bin"))?, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_short_read_without_retries_fails() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(MemoryFetcher {
            flaky: Mutex::new(HashSet::from([1])),
            ..MemoryFetcher::new(payload(400))
        });

        let err = DownloadCoordinator::new(options(2))
            .run_with_fetcher(fetcher, &request(dir.path()))
            .await
            .unwrap_err();

        match err {
            DownloadError::SegmentsFailed(failures) => {
                assert_eq!(failures[0].index, 1);
                assert_eq!(failures[0].bytes_written, 100);
                assert!(matches!(failures[0].error, TransferError::ShortRead { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_on_failure_stops_siblings() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(MemoryFetcher {
            failing: HashSet::from([0]),
            stalling: HashSet::from([1, 2]),
            ..MemoryFetcher::new(payload(300))
        });

        let coordinator = DownloadCoordinator::new(DownloadOptions {
            cancel_on_failure: true,
            ..options(3)
        });
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            coordinator.run_with_fetcher(fetcher, &request(dir.path())),
        )
        .await?
        .unwrap_err();

        match err {
            DownloadError::SegmentsFailed(failures) => {
                assert_eq!(failures.len(), 3);
                assert!(matches!(failures[0].error, TransferError::Status(_)));
                assert!(matches!(failures[1].error, TransferError::Cancelled));
                assert!(matches!(failures[2].error, TransferError::Cancelled));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The coordinator itself stays usable.
        assert!(!coordinator.cancellation_token().is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_external_cancellation() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(MemoryFetcher {
            stalling: HashSet::from([0, 1]),
            ..MemoryFetcher::new(payload(200))
        });

        let coordinator = DownloadCoordinator::new(options(2));
        let token = coordinator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            coordinator.run_with_fetcher(fetcher, &request(dir.path())),
        )
        .await?
        .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        // Journal is kept for a later resume.
        assert!(ResumeJournal::path_for(&dir.path().join("data.bin")).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_segment_timeout() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(MemoryFetcher {
            stalling: HashSet::from([0]),
            ..MemoryFetcher::new(payload(100))
        });

        let err = DownloadCoordinator::new(DownloadOptions {
            segment_timeout: Some(Duration::from_millis(50)),
            ..options(1)
        })
        .run_with_fetcher(fetcher, &request(dir.path()))
        .await
        .unwrap_err();

        match err {
            DownloadError::SegmentsFailed(failures) => {
                assert!(matches!(failures[0].error, TransferError::Timeout(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_hash_mismatch_fails_download() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let err = DownloadCoordinator::new(DownloadOptions {
            expected_sha256: Some("0".repeat(64)),
            ..options(2)
        })
        .run_with_fetcher(Arc::new(MemoryFetcher::new(payload(64))), &request(dir.path()))
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::HashMismatch { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_reports_resumed_and_transferred() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let data = payload(1000);
        std::fs::write(dir.path().join("data.bin"), &data[..400])?;

        let coordinator = DownloadCoordinator::new(DownloadOptions {
            resume: true,
            ..options(3)
        });
        coordinator
            .run_with_fetcher(Arc::new(MemoryFetcher::new(data)), &request(dir.path()))
            .await?;

        let progress = coordinator.progress();
        assert_eq!(progress.total(), 1000);
        assert_eq!(progress.resumed(), 400);
        assert_eq!(progress.transferred(), 600);
        assert_eq!(progress.position(), 1000);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_journal_replaced_before_destination_is_touched() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.bin");
        let data = payload(1000);

        // An earlier run got the first segment on disk and nothing else.
        let mut on_disk = vec![0u8; 1000];
        on_disk[..250].copy_from_slice(&data[..250]);
        std::fs::write(&path, &on_disk)?;
        let earlier = [
            Segment { index: 0, start: 0, end: 249 },
            Segment { index: 1, start: 250, end: 999 },
        ];
        let mut stale = ResumeJournal::new("http://example.com/data.bin", 1000, &earlier);
        stale.record(0, 250);
        let journal_path = ResumeJournal::path_for(&path);
        stale.save(&journal_path).await?;

        // A directory in place of the temp file makes every journal save fail.
        let mut blocker = journal_path.clone().into_os_string();
        blocker.push(".tmp");
        std::fs::create_dir(&blocker)?;

        let err = DownloadCoordinator::new(options(4))
            .run_with_fetcher(Arc::new(MemoryFetcher::new(data.clone())), &request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::LocalIo { .. }));

        // The destination was left alone, so the old journal still tells the truth.
        assert_eq!(std::fs::read(&path)?, on_disk);
        assert_eq!(probe::probe(&path, true).await?, 250);

        std::fs::remove_dir(&blocker)?;
        let summary = DownloadCoordinator::new(DownloadOptions {
            resume: true,
            ..options(4)
        })
        .run_with_fetcher(Arc::new(MemoryFetcher::new(data.clone())), &request(dir.path()))
        .await?;
        assert_eq!(summary.resumed_from, 250);
        assert_eq!(std::fs::read(&path)?, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_journal_tracks_finished_segments_while_siblings_run() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.bin");
        let fetcher = Arc::new(MemoryFetcher {
            stalling: HashSet::from([1, 2, 3]),
            ..MemoryFetcher::new(payload(1000))
        });
        let coordinator = DownloadCoordinator::new(options(4));
        let token = coordinator.cancellation_token();

        let watch_journal = async {
            let journal_path = ResumeJournal::path_for(&path);
            let mut offset = None;
            for _ in 0..500 {
                if let Some(journal) = ResumeJournal::load(&journal_path).await {
                    if journal.segments.first().is_some_and(|s| s.completed()) {
                        // What a resume would keep if the process died right now.
                        offset = Some(probe::probe(&path, true).await?);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            token.cancel();
            Ok::<_, DownloadError>(offset)
        };

        let req = request(dir.path());
        let (result, offset) = tokio::join!(
            coordinator.run_with_fetcher(fetcher, &req),
            watch_journal
        );
        assert_eq!(offset?, Some(250));
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        Ok(())
    }
}
