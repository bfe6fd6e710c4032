use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{DownloadError, DownloadResult};

/// Hex-encoded SHA-256 of the file at `path`.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compares the file's digest with `expected` (hex, any case).
pub async fn verify_sha256(path: &Path, expected: &str) -> DownloadResult<()> {
    let actual = sha256_file(path)
        .await
        .map_err(|e| DownloadError::local_io("cannot hash", path, e))?;

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(DownloadError::HashMismatch {
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}
