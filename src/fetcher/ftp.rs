use std::io::{self, Read};
use std::net::ToSocketAddrs;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{deliver, ChunkSink, RangeFetcher, CHUNK_SIZE};
use crate::error::{DownloadError, DownloadResult, TransferError};
use crate::plan::Segment;
use crate::resource::Resource;
use crate::writer::SinkStatus;

/// Chunks buffered between the blocking reader and the sink.
const CHANNEL_DEPTH: usize = 16;

/// FTP transfers using `REST` + `RETR`.
///
/// The FTP client is blocking, so each transfer runs on the blocking pool and
/// forwards chunks over a channel. `RETR` has no end offset: the transfer is
/// abandoned as soon as the sink reports its boundary.
pub struct FtpFetcher {
    resource: Resource,
    connect_timeout: Duration,
}

impl FtpFetcher {
    pub fn new(resource: Resource, connect_timeout: Duration) -> Self {
        Self {
            resource,
            connect_timeout,
        }
    }
}

/// Connects, logs in and enters the resource's directory in binary mode.
fn open_session(resource: &Resource, connect_timeout: Duration) -> Result<FtpStream, FtpError> {
    let (host, port) = resource.ftp_address();
    let addr = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(FtpError::ConnectionError)?
        .next()
        .ok_or_else(|| {
            FtpError::ConnectionError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve", host),
            ))
        })?;

    let mut ftp = FtpStream::connect_timeout(addr, connect_timeout)?;
    let (user, password) = resource.ftp_login();
    ftp.login(user.as_str(), password.as_str())?;
    tracing::debug!(%host, %user, "logged in to FTP server");

    let (dir, _) = resource.remote_path();
    ftp.cwd(dir.as_str())?;
    ftp.transfer_type(FileType::Binary)?;
    Ok(ftp)
}

#[derive(Debug, PartialEq, Eq)]
enum PumpEnd {
    Eof,
    ReceiverGone,
}

/// Reads `reader` in [`CHUNK_SIZE`] pieces into `tx` until EOF or until the
/// receiving side hangs up.
fn pump<R: Read>(reader: &mut R, tx: &mpsc::Sender<Vec<u8>>) -> io::Result<PumpEnd> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(PumpEnd::Eof),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if tx.blocking_send(buf[..n].to_vec()).is_err() {
            return Ok(PumpEnd::ReceiverGone);
        }
    }
}

fn retrieve_from(
    resource: &Resource,
    connect_timeout: Duration,
    offset: u64,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), TransferError> {
    let mut ftp = open_session(resource, connect_timeout)?;
    let (_, name) = resource.remote_path();

    if offset > 0 {
        ftp.resume_transfer(offset as usize)?;
    }
    let mut stream = ftp.retr_as_stream(name.as_str())?;

    match pump(&mut stream, &tx)? {
        PumpEnd::Eof => {
            ftp.finalize_retr_stream(stream)?;
        }
        PumpEnd::ReceiverGone => {
            // The server answers the dropped data connection with 426; nothing to wait for.
            drop(stream);
        }
    }
    let _ = ftp.quit();
    Ok(())
}

/// Moves chunks from the blocking reader into `sink` until the segment is full
/// or the reader is done, then waits for the reader to wind down.
async fn forward(
    segment: &Segment,
    mut rx: mpsc::Receiver<Vec<u8>>,
    reader: JoinHandle<Result<(), TransferError>>,
    sink: &mut dyn ChunkSink,
) -> Result<u64, TransferError> {
    let mut transferred = 0u64;
    let mut boundary_reached = false;
    while let Some(chunk) = rx.recv().await {
        let (taken, status) = deliver(sink, &chunk).await?;
        transferred += taken;
        if status == SinkStatus::BoundaryReached {
            boundary_reached = true;
            break;
        }
    }
    // Hanging up tells the reader to abandon the data connection.
    drop(rx);

    match reader.await {
        Ok(Ok(())) => {}
        // Errors while tearing down an abandoned transfer do not affect written data.
        Ok(Err(e)) if boundary_reached => {
            tracing::debug!(segment = segment.index, error = %e, "ignoring FTP error after segment end");
        }
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(TransferError::Aborted(e.to_string())),
    }

    Ok(transferred)
}

#[async_trait]
impl RangeFetcher for FtpFetcher {
    async fn content_length(&self) -> DownloadResult<u64> {
        let resource = self.resource.clone();
        let connect_timeout = self.connect_timeout;

        let size = tokio::task::spawn_blocking(move || -> Result<usize, FtpError> {
            let mut ftp = open_session(&resource, connect_timeout)?;
            let (_, name) = resource.remote_path();
            let size = ftp.size(name.as_str())?;
            let _ = ftp.quit();
            Ok(size)
        })
        .await;

        let reason = match size {
            Ok(Ok(size)) if size > 0 => return Ok(size as u64),
            Ok(Ok(_)) => "server reported size 0".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        Err(DownloadError::SizeUnknown {
            url: self.resource.to_string(),
            reason,
        })
    }

    async fn fetch(&self, segment: &Segment, sink: &mut dyn ChunkSink) -> Result<u64, TransferError> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let resource = self.resource.clone();
        let connect_timeout = self.connect_timeout;
        let offset = segment.start;

        let reader = tokio::task::spawn_blocking(move || {
            retrieve_from(&resource, connect_timeout, offset, tx)
        });
        forward(segment, rx, reader, sink).await
    }

    fn supports_random_access(&self) -> bool {
        false
    }
}
