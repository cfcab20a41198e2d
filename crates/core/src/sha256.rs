// SPDX-License-Identifier: MIT

//! Streaming SHA-256 of a file on disk.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the hex-encoded SHA-256 digest of `path`, reading in fixed-size
/// chunks so large run outputs don't need to fit in memory at once.
pub fn sha256sum_of(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
