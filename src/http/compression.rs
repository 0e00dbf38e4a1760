//! Gzip helpers for stored and guardrail-visible body copies.
//!
//! Client-bound bytes are never re-encoded; decompression here only feeds
//! guardrail evaluation and the request log.

use std::io::Read;

use axum::http::header::CONTENT_ENCODING;
use axum::http::HeaderMap;
use flate2::read::GzDecoder;

/// True if the response declares a gzip content encoding.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("gzip"))
        .unwrap_or(false)
}

/// Decompress a gzip body.
pub fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
