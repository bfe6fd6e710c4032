//! # segdl
//!
//! Segmented downloads over HTTP, HTTPS and FTP.
//!
//! The size of the remote file is discovered first, the remaining byte range
//! is split into segments, and one task per segment writes its bytes straight
//! into the pre-sized destination file. Interrupted downloads can be resumed.
//!
//! ```no_run
//! use segdl::{Credentials, DownloadCoordinator, DownloadOptions, DownloadRequest, Resource};
//!
//! # async fn example() -> Result<(), segdl::DownloadError> {
//! let request = DownloadRequest {
//!     resource: Resource::parse("https://example.com/big.iso", Credentials::default())?,
//!     destination: "big.iso".into(),
//! };
//! let coordinator = DownloadCoordinator::new(DownloadOptions {
//!     segments: 8,
//!     resume: true,
//!     ..Default::default()
//! });
//! let summary = coordinator.run(&request).await?;
//! println!("{} bytes in {:.1}s", summary.bytes_transferred, summary.elapsed_secs);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod hashing;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod resource;
pub mod state;
pub mod throttle;
pub mod utils;
pub mod writer;

pub use config::DownloadOptions;
pub use coordinator::{
    DownloadCoordinator, DownloadPhase, DownloadRequest, DownloadSummary, SegmentResult,
};
pub use error::{DownloadError, DownloadResult, SegmentFailure, TransferError};
pub use fetcher::{ChunkSink, RangeFetcher};
pub use plan::{plan, Segment};
pub use progress::ProgressState;
pub use resource::{Credentials, Resource, Transport};
