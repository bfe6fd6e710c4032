use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};

use super::{deliver, ChunkSink, RangeFetcher};
use crate::error::{DownloadError, DownloadResult, TransferError};
use crate::plan::Segment;
use crate::resource::Resource;
use crate::writer::SinkStatus;

/// HTTP/HTTPS transfers using `Range` requests.
pub struct HttpFetcher {
    resource: Resource,
    client: Client,
}

impl HttpFetcher {
    pub fn new(resource: Resource, client: Client) -> Self {
        Self { resource, client }
    }

    pub fn default_client(connect_timeout: Duration) -> DownloadResult<Client> {
        Client::builder()
            .user_agent(concat!("segdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DownloadError::InvalidConfig(format!("cannot build HTTP client: {}", e)))
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let request = self.client.request(method, self.resource.url().clone());
        let credentials = self.resource.credentials();
        match &credentials.username {
            Some(user) => request.basic_auth(user, credentials.password.as_ref()),
            None => request,
        }
    }

    async fn head_length(&self) -> Result<Option<u64>, TransferError> {
        let response = self.request(Method::HEAD).send().await?;
        if !response.status().is_success() {
            return Err(TransferError::Status(response.status()));
        }
        // `Response::content_length` reflects the (empty) HEAD body, not the header.
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok()))
    }

    /// Asks for the first byte only and reads the total from `Content-Range`.
    async fn first_byte_length(&self) -> Result<Option<u64>, TransferError> {
        let response = self
            .request(Method::GET)
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)),
            status if status.is_success() => Ok(response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())),
            status => Err(TransferError::Status(status)),
        }
    }
}

/// Total length from a `Content-Range: bytes 0-0/1234` value.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// First byte of a `Content-Range: bytes 250-499/1000` value.
fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

#[async_trait]
impl RangeFetcher for HttpFetcher {
    async fn content_length(&self) -> DownloadResult<u64> {
        match self.head_length().await {
            Ok(Some(size)) if size > 0 => return Ok(size),
            Ok(_) => tracing::debug!(url = %self.resource, "HEAD gave no length, probing first byte"),
            Err(e) => tracing::debug!(url = %self.resource, error = %e, "HEAD failed, probing first byte"),
        }

        let reason = match self.first_byte_length().await {
            Ok(Some(size)) if size > 0 => return Ok(size),
            Ok(_) => "server reported no length".to_string(),
            Err(e) => e.to_string(),
        };
        Err(DownloadError::SizeUnknown {
            url: self.resource.to_string(),
            reason,
        })
    }

    async fn fetch(&self, segment: &Segment, sink: &mut dyn ChunkSink) -> Result<u64, TransferError> {
        let response = self
            .request(Method::GET)
            .header(RANGE, segment.range_header())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PARTIAL_CONTENT {
            // Bytes are written where the segment starts, so the reply must start there too.
            let start = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_start);
            if start != Some(segment.start) {
                tracing::warn!(segment = segment.index, expected = segment.start, ?start, "partial reply at the wrong offset");
                return Err(TransferError::RangeIgnored(status));
            }
        } else {
            if !status.is_success() {
                return Err(TransferError::Status(status));
            }
            // A full body is only usable when it starts where the segment starts.
            if segment.start != 0 {
                return Err(TransferError::RangeIgnored(status));
            }
        }

        let mut stream = response.bytes_stream();
        let mut transferred = 0u64;

        while let Some(item) = stream.next().await {
            let bytes = item?;
            let (taken, status) = deliver(sink, &bytes).await?;
            transferred += taken;
            if status == SinkStatus::BoundaryReached {
                break;
            }
        }

        Ok(transferred)
    }

    fn supports_random_access(&self) -> bool {
        true
    }
}
