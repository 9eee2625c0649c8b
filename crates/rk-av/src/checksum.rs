//! SHA-256 content checksums.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use rk_pipeline::collaborators::Checksummer;
use sha2::{Digest, Sha256};

const CHUNK: usize = 1 << 20;

/// Hashes file contents with SHA-256 on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Checksummer;

#[async_trait]
impl Checksummer for Sha256Checksummer {
    async fn checksum(&self, path: &Path) -> rk_core::Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(|e| rk_core::Error::Internal(format!("checksum task failed: {e}")))?
    }
}

/// Hex-encoded SHA-256 of the file at `path`, read in 1 MiB chunks.
pub fn sha256_file(path: &Path) -> rk_core::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
