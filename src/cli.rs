use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use segdl::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_BACKOFF, DEFAULT_SEGMENTS};
use segdl::{Credentials, DownloadOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Segmented HTTP/HTTPS/FTP downloader", long_about = None)]
pub struct Args {
    /// URL to download (http, https or ftp)
    #[arg(index = 1)]
    pub url: String,

    /// Destination file (defaults to the last path segment of the URL)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Number of segments fetched concurrently
    #[arg(short = 's', long, default_value_t = DEFAULT_SEGMENTS)]
    pub segments: usize,

    /// Keep bytes already present in the destination
    #[arg(short = 'c', long = "continue")]
    pub resume: bool,

    /// User name (overrides the one embedded in the URL)
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Password (overrides the one embedded in the URL)
    #[arg(short = 'p', long, env = "SEGDL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Extra attempts per failed segment
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Base delay between retries in milliseconds (doubles per retry)
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF.as_millis() as u64)]
    pub retry_backoff_ms: u64,

    /// Deadline per segment attempt in seconds
    #[arg(long)]
    pub segment_timeout: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout: u64,

    /// Cancel the other segments as soon as one fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    pub rate_limit: Option<NonZeroU32>,

    /// Expected SHA-256 of the complete file
    #[arg(long)]
    pub sha256: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// More log output
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings and errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.user.clone(),
            password: self.password.clone(),
        }
    }

    pub fn options(&self) -> DownloadOptions {
        DownloadOptions {
            segments: self.segments,
            resume: self.resume,
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            segment_timeout: self.segment_timeout.map(Duration::from_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            cancel_on_failure: self.fail_fast,
            rate_limit: self.rate_limit,
            expected_sha256: self.sha256.clone(),
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "segdl=debug"
        } else if self.quiet {
            "segdl=warn"
        } else {
            "segdl=info"
        }
    }
}
