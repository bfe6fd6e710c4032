//! Resume journal stored next to the destination file.
//!
//! The destination is pre-sized to the full resource length, so its size alone
//! says nothing about how much of it is valid. The journal records, per
//! segment, how many bytes were actually written.
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::plan::Segment;

const JOURNAL_SUFFIX: &str = ".segdl.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResumeJournal {
    pub url: String,
    pub total_size: u64,
    pub segments: Vec<SegmentProgress>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentProgress {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub written: u64,
}

impl SegmentProgress {
    pub fn completed(&self) -> bool {
        self.written >= self.end - self.start + 1
    }
}

impl ResumeJournal {
    pub fn new(url: &str, total_size: u64, segments: &[Segment]) -> Self {
        Self {
            url: url.to_string(),
            total_size,
            segments: segments
                .iter()
                .map(|s| SegmentProgress {
                    index: s.index,
                    start: s.start,
                    end: s.end,
                    written: 0,
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn path_for(destination: &Path) -> PathBuf {
        let mut name = destination.as_os_str().to_os_string();
        name.push(JOURNAL_SUFFIX);
        PathBuf::from(name)
    }

    pub fn record(&mut self, index: usize, written: u64) {
        if let Some(segment) = self.segments.iter_mut().find(|s| s.index == index) {
            segment.written = written;
        }
        self.updated_at = Utc::now();
    }

    /// Length of the valid prefix of the destination file.
    ///
    /// Everything before the first planned segment was valid when the journal
    /// was created; from there, bytes count only while segments are complete
    /// and adjacent. A gap ends the prefix.
    pub fn contiguous_offset(&self) -> u64 {
        let mut segments = self.segments.clone();
        segments.sort_by_key(|s| s.start);

        let Some(first) = segments.first() else {
            return self.total_size;
        };

        let mut offset = first.start;
        for segment in &segments {
            if segment.start != offset {
                break;
            }
            offset += segment.written.min(segment.end - segment.start + 1);
            if !segment.completed() {
                break;
            }
        }
        offset
    }

    pub async fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(journal) => Some(journal),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable resume journal");
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await
    }

    pub async fn remove(path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// The journal of a running download, shared by its segment workers.
///
/// Progress is recorded as chunks land on disk and written out at most once
/// per `interval`, plus whenever a caller asks for an immediate save. Saves
/// are serialized by the lock, so the file never goes backwards within a run.
#[derive(Debug)]
pub struct JournalCheckpoint {
    path: PathBuf,
    interval: Duration,
    state: Mutex<CheckpointState>,
}

#[derive(Debug)]
struct CheckpointState {
    journal: ResumeJournal,
    last_saved: Option<Instant>,
}

impl JournalCheckpoint {
    pub fn new(journal: ResumeJournal, path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            state: Mutex::new(CheckpointState {
                journal,
                last_saved: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `written` bytes for segment `index`, saving if the last save is
    /// older than the interval.
    pub async fn record(&self, index: usize, written: u64) -> io::Result<()> {
        let mut state = self.state.lock().await;
        state.journal.record(index, written);
        let due = match state.last_saved {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        };
        if due {
            self.save_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Records and saves right away.
    pub async fn commit(&self, index: usize, written: u64) -> io::Result<()> {
        let mut state = self.state.lock().await;
        state.journal.record(index, written);
        self.save_locked(&mut state).await
    }

    pub async fn save(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state).await
    }

    pub async fn snapshot(&self) -> ResumeJournal {
        self.state.lock().await.journal.clone()
    }

    async fn save_locked(&self, state: &mut CheckpointState) -> io::Result<()> {
        state.journal.save(&self.path).await?;
        state.last_saved = Some(Instant::now());
        Ok(())
    }
}
