use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable bucket in `[0, 100)` for an (ambient event, actor) pair.
///
/// Seed-free and independent of process state: the same ids always land in
/// the same bucket.
pub fn visibility_bucket(ambient_id: &str, actor_id: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(ambient_id.as_bytes());
    hasher.update(b":");
    hasher.update(actor_id.as_bytes());
    let digest = hasher.finalize();
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head % 100) as u8
}

pub fn is_visible(ambient_id: &str, actor_id: &str, visibility_pct: u8) -> bool {
    visibility_bucket(ambient_id, actor_id) < visibility_pct
}

/// Content-addressed identifier: `<prefix>_<first 12 hex chars of sha256>`.
pub fn content_id(prefix: &str, canonical: &[u8]) -> String {
    let digest = sha256_hex(canonical);
    format!("{prefix}_{}", &digest[..12])
}
