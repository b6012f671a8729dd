//! Streaming SHA-256 over artifact bodies.

use std::io::Read;

use sha2::{Digest, Sha256};

const CHUNK: usize = 8192;

/// Hex digest and byte count of everything `reader` yields.
pub fn sha256_reader<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
