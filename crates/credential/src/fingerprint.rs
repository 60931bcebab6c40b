//! Process-unique machine fingerprint
//!
//! Used to build the `User-Agent` header sent on every refresh request.
//! Generated once per process and stable for its lifetime; not persisted
//! across restarts.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

static FINGERPRINT: OnceLock<String> = OnceLock::new();

/// A stable, opaque hex fingerprint for this process.
///
/// Derived from a random UUID generated on first use and hashed so its
/// length and character set are fixed regardless of the UUID representation.
pub fn fingerprint() -> &'static str {
    FINGERPRINT.get_or_init(|| {
        let seed = uuid::Uuid::new_v4();
        let digest = Sha256::digest(seed.as_bytes());
        hex_encode(&digest)
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
