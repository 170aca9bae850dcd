use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};

/// Seconds since the Unix epoch that tag timestamps count from.
pub const TAG_EPOCH_SECS: i64 = 1_682_924_400;

pub const META_LEN: usize = 48;
pub const DIGEST_LEN: usize = 16;
/// Payload length after the leading key byte.
pub const PAYLOAD_LEN: usize = META_LEN + 4 + DIGEST_LEN + 1;
pub const MARKER: u8 = 3;

/// Decoded identity tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord {
    pub meta: [u8; META_LEN],
    pub timestamp: u32,
    pub digest: [u8; DIGEST_LEN],
}

impl TagRecord {
    /// Builds a record for a request issued `elapsed` seconds after [`TAG_EPOCH_SECS`].
    pub fn new(meta: &[u8], method: &str, path: &str, elapsed: u32, fingerprint: &str) -> Self {
        Self {
            meta: pad_meta(meta),
            timestamp: elapsed,
            digest: fingerprint_digest(method, path, elapsed, fingerprint),
        }
    }
}

/// Right-pads with zeros or truncates to exactly 48 bytes.
pub fn pad_meta(meta: &[u8]) -> [u8; META_LEN] {
    let mut out = [0u8; META_LEN];
    let len = meta.len().min(META_LEN);
    out[..len].copy_from_slice(&meta[..len]);
    out
}

pub fn fingerprint_digest(method: &str, path: &str, elapsed: u32, fingerprint: &str) -> [u8; DIGEST_LEN] {
    let hash = Sha256::digest(format!("{method}!{path}!{elapsed}{fingerprint}").as_bytes());
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hash[..DIGEST_LEN]);
    out
}

/// Seconds elapsed since [`TAG_EPOCH_SECS`], clamped into `u32`.
pub fn elapsed_since_epoch(now_secs: i64) -> u32 {
    u32::try_from(now_secs.saturating_sub(TAG_EPOCH_SECS).max(0)).unwrap_or(u32::MAX)
}

pub fn encode(record: &TagRecord, key: u8) -> String {
    let mut out = Vec::with_capacity(PAYLOAD_LEN + 1);
    out.push(key);
    out.extend_from_slice(&record.meta);
    out.extend_from_slice(&record.timestamp.to_le_bytes());
    out.extend_from_slice(&record.digest);
    out.push(MARKER);
    for byte in &mut out[1..] {
        *byte ^= key;
    }
    STANDARD.encode(out)
}

/// Reverses [`encode`]. Missing base64 padding is tolerated.
pub fn decode(value: &str) -> Option<TagRecord> {
    let value = value.trim();
    let raw = STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value.trim_end_matches('=')))
        .ok()?;
    let (&key, payload) = raw.split_first()?;
    if payload.len() != PAYLOAD_LEN {
        return None;
    }
    let plain: Vec<u8> = payload.iter().map(|b| b ^ key).collect();
    if plain[PAYLOAD_LEN - 1] != MARKER {
        return None;
    }
    let mut meta = [0u8; META_LEN];
    meta.copy_from_slice(&plain[..META_LEN]);
    let mut ts = [0u8; 4];
    ts.copy_from_slice(&plain[META_LEN..META_LEN + 4]);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&plain[META_LEN + 4..META_LEN + 4 + DIGEST_LEN]);
    Some(TagRecord {
        meta,
        timestamp: u32::from_le_bytes(ts),
        digest,
    })
}
