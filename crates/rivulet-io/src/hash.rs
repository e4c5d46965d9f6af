//! Record-key hashing. Sources without a natural key derive one from the
//! record bytes; the object-storage sink derives object names from the
//! wall clock the same way.

use md5::{Digest, Md5};

/// Lowercase hex MD5 of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = md5_hex(b"{\"id\":\"a\"}");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
