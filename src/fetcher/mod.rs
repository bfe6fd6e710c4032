//! Transport-specific range transfers.
//!
//! A [`RangeFetcher`] knows how to learn the size of one remote resource and
//! how to stream one segment of it into a [`ChunkSink`].
mod ftp;
mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DownloadResult, TransferError};
use crate::plan::Segment;
use crate::resource::{Resource, Transport};
use crate::writer::SinkStatus;

pub use ftp::FtpFetcher;
pub use http::HttpFetcher;

/// Largest piece handed to a sink in one call.
pub const CHUNK_SIZE: usize = 8192;

/// Receiver of one segment's bytes, in order.
#[async_trait]
pub trait ChunkSink: Send {
    /// Accepts the next chunk and returns how many of its bytes were taken.
    /// [`SinkStatus::BoundaryReached`] means the segment is complete and the
    /// fetcher must stop reading.
    async fn accept(&mut self, chunk: &[u8]) -> Result<(usize, SinkStatus), TransferError>;
}

#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Total size of the resource in bytes, failing when it is zero or unknown.
    async fn content_length(&self) -> DownloadResult<u64>;

    /// Streams `segment` into `sink` and returns the number of bytes delivered.
    async fn fetch(&self, segment: &Segment, sink: &mut dyn ChunkSink) -> Result<u64, TransferError>;

    /// Whether independent ranges can be requested concurrently.
    fn supports_random_access(&self) -> bool;
}

/// Builds the fetcher matching the resource's transport.
///
/// `client` lets HTTP transfers share one connection pool; a fresh client is
/// built when none is given.
pub fn for_resource(
    resource: &Resource,
    client: Option<reqwest::Client>,
    connect_timeout: Duration,
) -> DownloadResult<Arc<dyn RangeFetcher>> {
    Ok(match resource.transport() {
        Transport::Http => {
            let client = match client {
                Some(client) => client,
                None => HttpFetcher::default_client(connect_timeout)?,
            };
            Arc::new(HttpFetcher::new(resource.clone(), client))
        }
        Transport::Ftp => Arc::new(FtpFetcher::new(resource.clone(), connect_timeout)),
    })
}

/// Hands `bytes` to `sink` in pieces of at most [`CHUNK_SIZE`].
///
/// Returns the number of bytes the sink took and whether it is full.
pub(crate) async fn deliver(
    sink: &mut dyn ChunkSink,
    bytes: &[u8],
) -> Result<(u64, SinkStatus), TransferError> {
    let mut delivered = 0u64;
    for piece in bytes.chunks(CHUNK_SIZE) {
        let (taken, status) = sink.accept(piece).await?;
        delivered += taken as u64;
        if status == SinkStatus::BoundaryReached {
            return Ok((delivered, status));
        }
    }
    Ok((delivered, SinkStatus::Continue))
}
