//! Stable per-install machine fingerprint embedded in the User-Agent string
//! this gateway presents to Kiro, mirroring the identity a real Kiro desktop
//! install would send.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;

static FINGERPRINT: OnceLock<String> = OnceLock::new();

/// SHA-256 of `hostname-username-kiro-gateway`, hex-encoded. Computed once
/// per process and cached — the value does not change at runtime.
pub fn machine_fingerprint() -> &'static str {
    FINGERPRINT.get_or_init(|| {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let username = whoami::username();
        let input = format!("{hostname}-{username}-kiro-gateway");
        let hash = Sha256::digest(input.as_bytes());
        hash.iter().map(|b| format!("{b:02x}")).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_hex() {
        let a = machine_fingerprint();
        let b = machine_fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
