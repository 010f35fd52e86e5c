//! SHA-256 content digests in OCI `algorithm:hex` form.

use std::io::{self, Read};

use ocipack_core::error::{PackError, Result};
use sha2::{Digest, Sha256};

/// Algorithm prefix of every digest this crate produces.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute SHA256 digest of raw bytes (hex string, no prefix).
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the prefixed digest of raw bytes.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, sha256_bytes(data))
}

/// Stream a reader to its end, returning the prefixed digest and byte count.
pub fn sha256_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize())), total))
}

/// Split and validate a digest string into `(algorithm, hex)`.
///
/// Only `sha256` with 64 lowercase hex characters is accepted, which also
/// guarantees the hex part is safe to use as a file name.
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let (algo, hex) = digest
        .split_once(':')
        .ok_or_else(|| PackError::InvalidPath(format!("Malformed digest: {}", digest)))?;

    if algo != "sha256" {
        return Err(PackError::InvalidPath(format!(
            "Unsupported digest algorithm in {}",
            digest
        )));
    }

    if hex.len() != 64 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(PackError::InvalidPath(format!("Malformed digest: {}", digest)));
    }

    Ok((algo, hex))
}
