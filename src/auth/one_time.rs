/*!
 * # One-time secrets
 *
 * Generation and at-rest hashing for OTP codes, magic-link tokens and
 * password reset tokens, plus PIN format rules. Secrets are only ever stored
 * as SHA-256 hex digests; the plaintext goes to the user through a notifier.
 */

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const MIN_PIN_LENGTH: usize = 4;
pub const MAX_PIN_LENGTH: usize = 8;

/// Random numeric code of `length` digits (leading zeros allowed).
pub fn generate_numeric_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_url_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 of a secret.
pub fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Compares a candidate with a stored digest without early exit.
pub fn token_matches(candidate: &str, stored_hash: &str) -> bool {
    let candidate_hash = hash_token(candidate);
    if candidate_hash.len() != stored_hash.len() {
        return false;
    }
    candidate_hash
        .bytes()
        .zip(stored_hash.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// PINs are 4 to 8 ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    (MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Appends `token` as a query parameter to the magic-link landing URL.
pub fn magic_link_url(base_url: &str, token: &str) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(base_url)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn url_token_is_url_safe() {
        let token = generate_url_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_url_token());
    }

    #[test]
    fn hashed_token_matches_only_itself() {
        let stored = hash_token("abc");
        assert_eq!(stored.len(), 64);
        assert!(token_matches("abc", &stored));
        assert!(!token_matches("abd", &stored));
    }

    #[test]
    fn magic_link_url_appends_token() {
        let url = magic_link_url("https://app.example.com/auth/magic?next=%2Fdash", "tok_1").unwrap();
        assert!(url.starts_with("https://app.example.com/auth/magic?"));
        assert!(url.contains("next=%2Fdash"));
        assert!(url.ends_with("token=tok_1"));
        assert!(magic_link_url("not a url", "t").is_err());
    }

    #[test]
    fn pin_format() {
        assert!(is_valid_pin("0000"));
        assert!(is_valid_pin("12345678"));
        assert!(!is_valid_pin("123"));
        assert!(!is_valid_pin("123456789"));
        assert!(!is_valid_pin("12a4"));
        assert!(!is_valid_pin("１２３４"));
    }

    proptest! {
        #[test]
        fn numeric_codes_have_requested_length(length in 4usize..=10) {
            let code = generate_numeric_code(length);
            prop_assert_eq!(code.len(), length);
            prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }

        #[test]
        fn digit_strings_in_range_are_valid_pins(pin in "[0-9]{4,8}") {
            prop_assert!(is_valid_pin(&pin));
        }
    }
}
