//! SHA-256 digests for generated artifacts

use sha2::{Digest, Sha256};
use std::path::Path;

/// Digest `data` and render it as `sha256:<hex>`
pub fn sha256_prefixed(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", hex)
}

/// Digest a file's contents
pub fn sha256_file<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(sha256_prefixed(&data))
}
