//! Gzip helpers for request and snapshot payloads.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{CoreError, Result};

/// Value of the `Content-Encoding` header for gzip bodies.
pub const GZIP_ENCODING: &str = "gzip";

/// Compresses `data` with gzip at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Compression {
            reason: e.to_string(),
        })?;
    encoder.finish().map_err(|e| CoreError::Compression {
        reason: e.to_string(),
    })
}

/// Decompresses a gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::Compression {
            reason: e.to_string(),
        })?;
    Ok(out)
}
