pub mod conversation;
pub mod kv;
pub mod recall;
pub mod scoring;
pub mod search;
pub mod stats;
pub mod store;
pub mod temporal;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};

/// Encode an f32 embedding as the little-endian BLOB sqlite-vec reads.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`embedding_to_bytes`]. Trailing partial floats are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Fixed-precision RFC 3339 text, so string order matches time order in SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse stored RFC 3339 text back to UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
