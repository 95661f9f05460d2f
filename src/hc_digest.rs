use sha2::{Digest as _, Sha256};

use crate::hc_interface::Digest;

/// Content hash of a wire encoding: SHA-256 over the UTF-8 bytes, lowercase hex.
pub fn sha256_hex(data: &str) -> Digest {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// 31-polynomial string hash over UTF-16 code units with 32-bit wrapping.
///
/// Generated transaction payloads are derived from it so recorded
/// transcripts stay reproducible.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(unit as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_is_lowercase_64_digits() {
        let h = sha256_hex("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h.len(), 64);
    }

    #[test]
    fn test_string_hash_matches_known_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
        // wraps around like a 32-bit integer
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
    }
}
