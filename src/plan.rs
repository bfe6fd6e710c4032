//! Partitioning of the remaining byte range into download segments.
use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, DownloadResult};

/// An inclusive byte range of the remote resource assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Segment {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the HTTP `Range` header covering this segment.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// The part of this segment left after `done` bytes were written.
    ///
    /// Returns `None` once the segment is fully covered.
    pub fn remainder(&self, done: u64) -> Option<Segment> {
        if done >= self.len() {
            return None;
        }
        Some(Segment {
            index: self.index,
            start: self.start + done,
            end: self.end,
        })
    }
}

/// Splits `[resume_offset, total_size - 1]` into at most `num_segments` contiguous segments.
///
/// Transports without independent range requests (`random_access == false`)
/// can only continue a partial file from its end, so a resumed download on
/// them is planned as one segment.
pub fn plan(
    total_size: u64,
    resume_offset: u64,
    num_segments: usize,
    random_access: bool,
) -> DownloadResult<Vec<Segment>> {
    if num_segments == 0 {
        return Err(DownloadError::InvalidConfig(
            "segment count must be at least 1".to_string(),
        ));
    }

    if resume_offset >= total_size {
        return Ok(Vec::new());
    }

    let remaining = total_size - resume_offset;
    let wanted = if resume_offset > 0 && !random_access {
        1
    } else {
        (num_segments as u64).min(remaining)
    };
    let segment_size = remaining.div_ceil(wanted);

    let mut segments = Vec::with_capacity(wanted as usize);
    let mut start = resume_offset;
    while start < total_size {
        let end = (start + segment_size).min(total_size) - 1;
        segments.push(Segment {
            index: segments.len(),
            start,
            end,
        });
        start = end + 1;
    }

    Ok(segments)
}
