use std::path::Path;

use tokio::fs;

use crate::error::{DownloadError, DownloadResult};
use crate::state::ResumeJournal;

/// Returns how many leading bytes of `destination` can be kept.
///
/// Without a resume request, or without an existing file, nothing is kept.
/// With a journal whose total matches the file length, the journal's
/// contiguous prefix is used; otherwise the file size itself is trusted.
/// Previously written bytes are never checksummed here.
pub async fn probe(destination: &Path, resume_requested: bool) -> DownloadResult<u64> {
    if !resume_requested {
        return Ok(0);
    }

    let metadata = match fs::metadata(destination).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(DownloadError::local_io("cannot inspect", destination, e)),
    };
    let file_size = metadata.len();

    let journal_path = ResumeJournal::path_for(destination);
    if let Some(journal) = ResumeJournal::load(&journal_path).await {
        if journal.total_size == file_size {
            let offset = journal.contiguous_offset();
            tracing::debug!(offset, file_size, "resume offset taken from journal");
            return Ok(offset);
        }
        tracing::warn!(
            journal_total = journal.total_size,
            file_size,
            "resume journal does not match destination, trusting file size"
        );
    }

    Ok(file_size)
}
