// [library] Argon2 - industry-standard password hashing algorithm
// Argon2id variant provides both memory-hard and compute-hard properties
use argon2::{Algorithm, Argon2, Params, Version};

// [library] Base64url encoding for the derived key and salt stored next to the user
use base64::{engine::general_purpose::URL_SAFE, Engine as _};

// [security] OS entropy source for salts
use rand::{rngs::OsRng, RngCore};

use serde::{Deserialize, Serialize};

// [library] Structured error types with automatic Display and Error trait derivation
use thiserror::Error;

use crate::{db::models::UserCredential, security::jwt::constant_time_eq};

// [security] Argon2id cost parameters, persisted with every credential
// Memory is expressed in KiB, lengths in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    pub time: u32,
    pub memory: u32,
    pub threads: u32,
    pub key_length: u32,
    pub salt_length: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            time: 1,
            memory: 64 * 1024,
            threads: 4,
            key_length: 32,
            salt_length: 16,
        }
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("stored credential could not be decoded: {0}")]
    DecodeFailure(String),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("invalid hashing parameters: {0}")]
    Params(argon2::Error),
}

fn derive_key(secret: &str, salt: &[u8], params: &HashParams) -> Result<Vec<u8>, argon2::Error> {
    let argon_params = Params::new(
        params.memory,
        params.time,
        params.threads,
        Some(params.key_length as usize),
    )?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = vec![0u8; params.key_length as usize];
    argon2.hash_password_into(secret.as_bytes(), salt, &mut key)?;
    Ok(key)
}

// [security] Hash a secret with a fresh random salt
// Returns (key, salt), both base64url encoded. Never store plaintext passwords.
pub fn hash_password(secret: &str, params: &HashParams) -> Result<(String, String), PasswordError> {
    let mut salt = vec![0u8; params.salt_length as usize];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| PasswordError::Entropy(e.to_string()))?;

    let key = derive_key(secret, &salt, params).map_err(PasswordError::Params)?;

    Ok((URL_SAFE.encode(key), URL_SAFE.encode(salt)))
}

// [security] Re-derive with the stored parameters and compare in constant time
pub fn verify_password(
    secret: &str,
    hash: &str,
    salt: &str,
    params: &HashParams,
) -> Result<(), PasswordError> {
    let expected = URL_SAFE
        .decode(hash)
        .map_err(|e| PasswordError::DecodeFailure(e.to_string()))?;
    let salt = URL_SAFE
        .decode(salt)
        .map_err(|e| PasswordError::DecodeFailure(e.to_string()))?;

    let derived =
        derive_key(secret, &salt, params).map_err(|e| PasswordError::DecodeFailure(e.to_string()))?;

    if constant_time_eq(&derived, &expected) {
        Ok(())
    } else {
        Err(PasswordError::InvalidCredential)
    }
}

impl UserCredential {
    pub fn derive(secret: &str, params: &HashParams) -> Result<Self, PasswordError> {
        let (key, salt) = hash_password(secret, params)?;
        Ok(Self {
            key,
            salt,
            params: *params,
        })
    }

    pub fn verify(&self, secret: &str) -> Result<(), PasswordError> {
        verify_password(secret, &self.key, &self.salt, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap parameters keep the suite fast; production uses HashParams::default().
    fn test_params() -> HashParams {
        HashParams {
            time: 1,
            memory: 1024,
            threads: 1,
            key_length: 32,
            salt_length: 16,
        }
    }

    #[test]
    fn test_password_hash_and_verify() {
        let params = test_params();
        let (hash, salt) = hash_password("test_password_123", &params).expect("Failed to hash password");

        assert!(verify_password("test_password_123", &hash, &salt, &params).is_ok());
        assert!(matches!(
            verify_password("wrong_password", &hash, &salt, &params),
            Err(PasswordError::InvalidCredential)
        ));
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let params = test_params();
        let (hash1, salt1) = hash_password("same_password", &params).unwrap();
        let (hash2, salt2) = hash_password("same_password", &params).unwrap();

        // Different salts should produce different hashes
        assert_ne!(salt1, salt2);
        assert_ne!(hash1, hash2);

        assert!(verify_password("same_password", &hash1, &salt1, &params).is_ok());
        assert!(verify_password("same_password", &hash2, &salt2, &params).is_ok());
    }

    #[test]
    fn test_output_lengths_follow_params() {
        let params = HashParams {
            key_length: 48,
            salt_length: 24,
            ..test_params()
        };
        let (hash, salt) = hash_password("secret", &params).unwrap();
        assert_eq!(URL_SAFE.decode(hash).unwrap().len(), 48);
        assert_eq!(URL_SAFE.decode(salt).unwrap().len(), 24);
    }

    #[test]
    fn test_verification_uses_stored_params() {
        let stored = test_params();
        let (hash, salt) = hash_password("secret", &stored).unwrap();

        // Same secret under different cost parameters derives a different key
        let changed = HashParams { time: 2, ..stored };
        assert!(verify_password("secret", &hash, &salt, &stored).is_ok());
        assert!(matches!(
            verify_password("secret", &hash, &salt, &changed),
            Err(PasswordError::InvalidCredential)
        ));
    }

    #[test]
    fn test_password_verification_attacks() {
        let params = test_params();
        let (hash, salt) = hash_password("correct_password", &params).unwrap();

        let attack_vectors = vec![
            "",                   // Empty password
            "\0",                 // Null byte
            "correct_password\0", // Null byte injection
            "correct_password\n", // Newline injection
            "CORRECT_PASSWORD",   // Case sensitivity test
            " correct_password",  // Leading space
            "correct_passwörd",   // Similar with umlaut
        ];

        for attack in attack_vectors {
            assert!(
                verify_password(attack, &hash, &salt, &params).is_err(),
                "Attack vector should fail: {:?}",
                attack
            );
        }

        assert!(verify_password("correct_password", &hash, &salt, &params).is_ok());
    }

    #[test]
    fn test_malformed_stored_values_are_rejected() {
        let params = test_params();
        let (hash, salt) = hash_password("secret", &params).unwrap();

        assert!(matches!(
            verify_password("secret", "not base64 !!", &salt, &params),
            Err(PasswordError::DecodeFailure(_))
        ));
        assert!(matches!(
            verify_password("secret", &hash, "%%%", &params),
            Err(PasswordError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_invalid_params_fail_hashing() {
        // Argon2 requires salts of at least 8 bytes
        let params = HashParams {
            salt_length: 4,
            ..test_params()
        };
        assert!(matches!(
            hash_password("secret", &params),
            Err(PasswordError::Params(_))
        ));
    }

    #[test]
    fn test_user_credential_round_trip() {
        let credential = UserCredential::derive("пароль🔒密码", &test_params()).unwrap();
        assert_eq!(credential.params, test_params());
        assert!(credential.verify("пароль🔒密码").is_ok());
        assert!(credential.verify("password").is_err());
    }
}
