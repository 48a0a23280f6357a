use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest.
pub const HASH_LENGTH: usize = 12;

/// Salted, truncated SHA-256 of `value`, as lowercase hex.
///
/// Without a salt (or with an empty one) the value is returned unchanged, so
/// callers can pass an optional salt straight through.
pub fn hash_value(value: &str, salt: Option<&str>) -> String {
    match salt {
        Some(salt) if !salt.is_empty() => {
            let mut hasher = Sha256::new();
            hasher.update(salt.as_bytes());
            hasher.update(value.as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            digest[..HASH_LENGTH].to_string()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_deterministic() {
        assert_eq!(hash_value("007", Some("secret")), hash_value("007", Some("secret")));
    }

    #[test]
    fn different_salt_different_hash() {
        assert_ne!(hash_value("007", Some("secret")), hash_value("007", Some("pepper")));
    }

    #[test]
    fn different_value_different_hash() {
        assert_ne!(hash_value("007", Some("secret")), hash_value("008", Some("secret")));
    }

    #[test]
    fn output_is_fixed_length_hex() {
        for value in ["", "7", "a-very-long-case-number-0123456789-0123456789"] {
            let h = hash_value(value, Some("secret"));
            assert_eq!(h.len(), HASH_LENGTH);
            assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn no_salt_returns_value_unchanged() {
        assert_eq!(hash_value("007", None), "007");
        assert_eq!(hash_value("007", Some("")), "007");
    }

    #[test]
    fn matches_sha256_of_salt_then_value() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad
        assert_eq!(hash_value("bc", Some("a")), "ba7816bf8f01");
    }
}
