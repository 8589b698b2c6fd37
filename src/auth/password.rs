/*!
 * # Password hashing and policy
 *
 * Argon2id hashing for passwords and PINs, and the complexity policy applied
 * when a password is set.
 */

use crate::errors::ServiceError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use std::collections::HashSet;
use thiserror::Error;

/// Hashes a secret (password or PIN) into a PHC string.
pub fn hash_secret(secret: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

/// Verifies a secret against a stored PHC string. A malformed hash is an
/// internal error, a mismatch is `Ok(false)`.
pub fn verify_secret(secret: &str, stored_hash: &str) -> Result<bool, ServiceError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| ServiceError::HashError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PasswordPolicyError {
    #[error("Password too short: minimum {min_length} characters required")]
    TooShort { min_length: usize },

    #[error("Password too long: maximum {max_length} characters allowed")]
    TooLong { max_length: usize },

    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,

    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,

    #[error("Password must contain at least one number")]
    MissingNumber,

    #[error("Password is in the list of commonly used passwords")]
    CommonPassword,

    #[error("Password must not contain the account email")]
    SimilarToEmail,
}

impl From<PasswordPolicyError> for ServiceError {
    fn from(err: PasswordPolicyError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub prevent_common_passwords: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 10,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            prevent_common_passwords: true,
        }
    }
}

lazy_static! {
    static ref COMMON_PASSWORDS: HashSet<&'static str> = [
        "password", "password1", "password123", "123456", "12345678", "123456789",
        "1234567890", "qwerty", "qwerty123", "abc123", "letmein", "welcome",
        "welcome1", "iloveyou", "admin", "admin123", "monkey", "football",
        "baseball", "superman", "trustno1", "1qaz2wsx", "q1w2e3r4", "zaq1zaq1",
        "inventory", "warehouse", "changeme",
    ]
    .into_iter()
    .collect();
}

impl PasswordPolicy {
    /// Validate a password against the policy
    pub fn validate(&self, password: &str, email: Option<&str>) -> Result<(), PasswordPolicyError> {
        let length = password.chars().count();
        if length < self.min_length {
            return Err(PasswordPolicyError::TooShort {
                min_length: self.min_length,
            });
        }
        if length > self.max_length {
            return Err(PasswordPolicyError::TooLong {
                max_length: self.max_length,
            });
        }

        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return Err(PasswordPolicyError::MissingUppercase);
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            return Err(PasswordPolicyError::MissingLowercase);
        }
        if self.require_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordPolicyError::MissingNumber);
        }

        if self.prevent_common_passwords
            && COMMON_PASSWORDS.contains(password.to_lowercase().as_str())
        {
            return Err(PasswordPolicyError::CommonPassword);
        }

        if let Some(local_part) = email
            .and_then(|e| e.split('@').next())
            .filter(|local| local.len() >= 3)
        {
            if password
                .to_lowercase()
                .contains(&local_part.to_lowercase())
            {
                return Err(PasswordPolicyError::SimilarToEmail);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn hash_and_verify() {
        let hash = hash_secret("Correct-Horse-7").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_secret("Correct-Horse-7", &hash).unwrap());
        assert!(!verify_secret("wrong", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_secret("x", "not-a-phc-string").is_err());
    }

    #[rstest]
    #[case("Short1A", PasswordPolicyError::TooShort { min_length: 10 })]
    #[case("alllowercase1", PasswordPolicyError::MissingUppercase)]
    #[case("ALLUPPERCASE1", PasswordPolicyError::MissingLowercase)]
    #[case("NoDigitsHere", PasswordPolicyError::MissingNumber)]
    fn rejects_weak_passwords(#[case] password: &str, #[case] expected: PasswordPolicyError) {
        assert_eq!(
            PasswordPolicy::default().validate(password, None),
            Err(expected)
        );
    }

    #[test]
    fn rejects_password_containing_email() {
        let policy = PasswordPolicy::default();
        assert_eq!(
            policy.validate("Jordan-Stock-42", Some("jordan@example.com")),
            Err(PasswordPolicyError::SimilarToEmail)
        );
        assert!(policy
            .validate("Harbor-Lantern-42", Some("jordan@example.com"))
            .is_ok());
    }
}
