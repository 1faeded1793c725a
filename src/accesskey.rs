//! Per-repository shared-secret generation, used by
//! `POST /producers/:id/accesskey`.

use rand::RngCore;

/// A fresh 32-byte secret, hex-encoded, suitable for `lunchbadger.accesskey`.
pub fn generate() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_64_hex_chars() {
        let key = generate();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn two_calls_differ() {
        assert_ne!(generate(), generate());
    }
}
