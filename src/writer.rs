//! Positioned writes into the shared, pre-sized destination file.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::OpenOptions;

use crate::error::{DownloadError, DownloadResult};
use crate::plan::Segment;

/// Shared handle to the destination file.
///
/// Opened once before any worker starts and pre-extended to the resource
/// length. Workers write through [`BoundedSink`]s whose ranges never overlap,
/// so writes need no lock. Each write runs on the blocking pool.
#[derive(Debug)]
pub struct SegmentWriter {
    file: Arc<File>,
    path: PathBuf,
    total_size: u64,
}

impl SegmentWriter {
    /// Opens `path` for positioned writes and sizes it to `total_size`.
    ///
    /// With `keep_existing` the current content is preserved; otherwise the
    /// file is truncated first.
    pub async fn open(path: &Path, total_size: u64, keep_existing: bool) -> DownloadResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(!keep_existing)
            .open(path)
            .await
            .map_err(|e| DownloadError::local_io("cannot open", path, e))?;

        file.set_len(total_size)
            .await
            .map_err(|e| DownloadError::local_io("cannot pre-size", path, e))?;

        Ok(Self {
            file: Arc::new(file.into_std().await),
            path: path.to_path_buf(),
            total_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub async fn write_at(&self, offset: u64, bytes: Vec<u8>) -> io::Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || write_all_at(&file, &bytes, offset))
            .await
            .map_err(io::Error::other)?
    }

    /// Flushes written data to storage. Called once after every worker finished.
    pub async fn close(&self) -> DownloadResult<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DownloadError::local_io("cannot flush", &self.path, io::Error::other(e)))?
            .map_err(|e| DownloadError::local_io("cannot flush", &self.path, e))
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, bytes: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(bytes, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut bytes: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !bytes.is_empty() {
        match file.seek_write(bytes, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                bytes = &bytes[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    BoundaryReached,
}

/// A writer restricted to one segment's byte range.
///
/// Chunks are applied in arrival order at consecutive offsets. Bytes past the
/// end of the segment are dropped and the caller is told to stop reading.
#[derive(Debug)]
pub struct BoundedSink {
    writer: Arc<SegmentWriter>,
    next_offset: u64,
    end: u64,
    accepted: u64,
}

impl BoundedSink {
    pub fn new(writer: Arc<SegmentWriter>, segment: &Segment) -> Self {
        Self {
            writer,
            next_offset: segment.start,
            end: segment.end,
            accepted: 0,
        }
    }

    /// Writes as much of `chunk` as fits and returns how many bytes were taken.
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<(usize, SinkStatus)> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok((0, SinkStatus::BoundaryReached));
        }

        let take = (chunk.len() as u64).min(remaining) as usize;
        self.writer
            .write_at(self.next_offset, chunk[..take].to_vec())
            .await?;
        self.next_offset += take as u64;
        self.accepted += take as u64;

        let status = if self.remaining() == 0 {
            SinkStatus::BoundaryReached
        } else {
            SinkStatus::Continue
        };
        Ok((take, status))
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn remaining(&self) -> u64 {
        (self.end + 1).saturating_sub(self.next_offset)
    }
}
