use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{DownloadError, DownloadResult};

pub const DEFAULT_SEGMENTS: usize = 8;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning knobs of one download.
///
/// The defaults reproduce the plain behaviour: no retries, no deadline, and
/// failing segments do not stop their siblings.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Number of segments, which is also the number of concurrent workers.
    pub segments: usize,
    /// Keep bytes already present in the destination.
    pub resume: bool,
    /// Extra attempts per segment after a retryable failure.
    pub retries: u32,
    /// Delay before the first retry; doubled on every further one.
    pub retry_backoff: Duration,
    /// Deadline for a single attempt of a single segment.
    pub segment_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    /// Cancel the remaining segments as soon as one fails for good.
    pub cancel_on_failure: bool,
    /// Global cap in bytes per second.
    pub rate_limit: Option<NonZeroU32>,
    /// Hex SHA-256 the completed file must match.
    pub expected_sha256: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            segments: DEFAULT_SEGMENTS,
            resume: false,
            retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            segment_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cancel_on_failure: false,
            rate_limit: None,
            expected_sha256: None,
        }
    }
}

impl DownloadOptions {
    pub fn validate(&self) -> DownloadResult<()> {
        if self.segments == 0 {
            return Err(DownloadError::InvalidConfig(
                "segment count must be at least 1".to_string(),
            ));
        }
        if self.segment_timeout == Some(Duration::ZERO) {
            return Err(DownloadError::InvalidConfig(
                "segment timeout must be positive".to_string(),
            ));
        }
        if let Some(hash) = &self.expected_sha256 {
            let hash = hash.trim();
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DownloadError::InvalidConfig(format!(
                    "expected SHA-256 must be 64 hex digits, got {:?}",
                    hash
                )));
            }
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}
