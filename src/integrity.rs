use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use md5::{Md5, Digest};
use thiserror::Error;

/// Block size used when streaming a file through the digest.
const HASH_BLOCK_SIZE: usize = 1024 * 8;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compute the MD5 hash of a file asynchronously, as lowercase hex.
pub async fn md5_sum(path: &Path) -> Result<String, IntegrityError> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    let mut buffer = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 { break; }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Ledger and state hashes are compared as case-insensitive hex strings.
pub fn hashes_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}
