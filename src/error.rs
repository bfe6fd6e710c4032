use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single segment transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(StatusCode),

    #[error("server ignored the range request (status {0})")]
    RangeIgnored(StatusCode),

    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("stream ended early: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("local write failed: {0}")]
    Io(#[from] io::Error),

    #[error("rate limiter rejected a chunk of {0} bytes")]
    RateLimit(u32),

    #[error("worker aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// Whether another attempt at the same segment may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Http(_)
            | TransferError::Ftp(_)
            | TransferError::ShortRead { .. }
            | TransferError::Timeout(_) => true,
            TransferError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Per-segment failure detail carried by [`DownloadError::SegmentsFailed`].
#[derive(Debug)]
pub struct SegmentFailure {
    pub index: usize,
    pub bytes_written: u64,
    pub error: TransferError,
}

impl fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {} failed after {} bytes: {}",
            self.index, self.bytes_written, self.error
        )
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("cannot determine the size of {url}: {reason}")]
    SizeUnknown { url: String, reason: String },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{} segment(s) failed: {}", .0.len(), join_failures(.0))]
    SegmentsFailed(Vec<SegmentFailure>),

    #[error("{context} {}: {source}", .path.display())]
    LocalIo {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn local_io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::LocalIo {
            context,
            path: path.into(),
            source,
        }
    }

    /// Failures that happen before any worker starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::SizeUnknown { .. }
                | DownloadError::UnsupportedScheme(_)
                | DownloadError::InvalidUrl { .. }
                | DownloadError::InvalidConfig(_)
        )
    }
}

fn join_failures(failures: &[SegmentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_retryable() {
        assert!(TransferError::Status(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(TransferError::Status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(TransferError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransferError::ShortRead { expected: 10, actual: 3 }.is_retryable());

        assert!(!TransferError::Status(StatusCode::NOT_FOUND).is_retryable());
        assert!(!TransferError::RangeIgnored(StatusCode::OK).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
    }

    #[test]
    fn test_segments_failed_names_each_segment() {
        let err = DownloadError::SegmentsFailed(vec![
            SegmentFailure {
                index: 1,
                bytes_written: 0,
                error: TransferError::Status(StatusCode::INTERNAL_SERVER_ERROR),
            },
            SegmentFailure {
                index: 3,
                bytes_written: 12,
                error: TransferError::ShortRead { expected: 20, actual: 12 },
            },
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 segment(s) failed"));
        assert!(message.contains("segment 1 failed after 0 bytes"));
        assert!(message.contains("segment 3 failed after 12 bytes"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DownloadError::SizeUnknown {
            url: "http://x/".into(),
            reason: "no Content-Length".into(),
        }.is_fatal());
        assert!(DownloadError::UnsupportedScheme("gopher".into()).is_fatal());
        assert!(!DownloadError::Cancelled.is_fatal());
        assert!(!DownloadError::SegmentsFailed(vec![]).is_fatal());
    }
}
