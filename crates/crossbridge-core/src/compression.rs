//! Payload compression for outbound cross-runtime messages
//!
//! Payloads below the threshold travel as-is. Larger ones are zlib-deflated;
//! the resulting ratio is kept for diagnostics only.

use crate::errors::BridgeResult;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::io::{Read, Write};

/// Outcome of [`compress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    pub original_len: usize,
}

impl CompressedPayload {
    /// Compressed size over original size; 1.0 when untouched
    pub fn ratio(&self) -> f64 {
        if !self.compressed || self.original_len == 0 {
            return 1.0;
        }
        self.bytes.len() as f64 / self.original_len as f64
    }
}

/// Deflate `payload` when it is at least `threshold` bytes long
pub fn compress(payload: &[u8], threshold: usize) -> BridgeResult<CompressedPayload> {
    if payload.len() < threshold {
        return Ok(CompressedPayload {
            bytes: payload.to_vec(),
            compressed: false,
            original_len: payload.len(),
        });
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let bytes = encoder.finish()?;

    Ok(CompressedPayload {
        bytes,
        compressed: true,
        original_len: payload.len(),
    })
}

/// Inflate a zlib stream produced by [`compress`]
pub fn decompress(bytes: &[u8]) -> BridgeResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_untouched() {
        let payload = vec![b'a'; 1023];
        let result = compress(&payload, 1024).unwrap();
        assert!(!result.compressed);
        assert_eq!(result.bytes, payload);
        assert_eq!(result.ratio(), 1.0);
    }

    #[test]
    fn test_large_repetitive_payload_shrinks() {
        let payload = br#"{"id":"AA:BB","rssi":-40}"#.repeat(100);
        let result = compress(&payload, 1024).unwrap();

        assert!(result.compressed);
        assert!(result.ratio() < 0.5);
        assert_eq!(decompress(&result.bytes).unwrap(), payload);
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        assert!(decompress(b"not zlib").is_err());
    }
}
