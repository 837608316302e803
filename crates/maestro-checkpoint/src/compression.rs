//! gzip encoding with bounded decoding.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::CheckpointError;

/// gzip `data` on the blocking pool.
pub(crate) async fn gzip(data: Vec<u8>) -> Result<Vec<u8>, CheckpointError> {
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()
    })
    .await
    .map_err(|e| CheckpointError::Compression(format!("gzip task failed: {}", e)))?
    .map_err(|e| CheckpointError::Compression(format!("gzip failed: {}", e)))
}

/// gunzip `data`, refusing to produce more than `limit` bytes.
///
/// Decoding stops one byte past the limit, so a compression bomb never
/// expands further than that in memory.
pub(crate) async fn gunzip_bounded(data: Vec<u8>, limit: u64) -> Result<Vec<u8>, CheckpointError> {
    let out = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        GzDecoder::new(data.as_slice())
            .take(limit.saturating_add(1))
            .read_to_end(&mut out)
            .map(|_| out)
    })
    .await
    .map_err(|e| CheckpointError::Compression(format!("gunzip task failed: {}", e)))?
    .map_err(|e| CheckpointError::Compression(format!("gunzip failed: {}", e)))?;

    if out.len() as u64 > limit {
        return Err(CheckpointError::Size(format!(
            "decompressed size exceeds limit of {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Reject an expansion ratio above `max_ratio`, independent of absolute size.
pub(crate) fn check_ratio(
    compressed_len: usize,
    decompressed_len: usize,
    max_ratio: f64,
) -> Result<(), CheckpointError> {
    if compressed_len == 0 {
        return Err(CheckpointError::Size("compressed payload is empty".to_string()));
    }
    let ratio = decompressed_len as f64 / compressed_len as f64;
    if ratio > max_ratio {
        return Err(CheckpointError::Size(format!(
            "compression ratio {:.1} exceeds maximum of {:.1} ({} -> {} bytes)",
            ratio, max_ratio, compressed_len, decompressed_len
        )));
    }
    Ok(())
}
